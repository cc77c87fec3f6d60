use std::path::Path;

use gti_core::{GtiError, GtiPipeline, GtiResult, HistoryStore, PhaseGapSample, StreamSet};
use log::{info, warn};

/// Column header of the per-pair coherence table. Frequencies are in
/// cycles per sample.
fn pair_table_header() -> String {
    format!(
        "{:<24} {:>10} {:>19} {:>9}",
        "Pair", "Peak coh", "Peak f (cyc/sample)", "Coherent"
    )
}

pub struct AnalyzeCommandConfig<'a> {
    pub input_path: &'a str,
    pub config_path: Option<&'a str>,
    pub output_path: Option<&'a str>,
    pub history_path: Option<&'a str>,
}

pub fn run(cfg: AnalyzeCommandConfig<'_>) -> Result<(), GtiError> {
    let config = super::load_config(cfg.config_path)?;
    let streams = StreamSet::load(Path::new(cfg.input_path))?;
    let pipeline = GtiPipeline::from_config(&config)?;

    println!(
        "Analyzing {} stream(s) from {}...\n",
        streams.len(),
        cfg.input_path
    );

    let Some(result) = pipeline.process(&streams)? else {
        warn!("{}: no GTI snapshot produced", cfg.input_path);
        println!(
            "Not enough data for a GTI snapshot: need 2 streams with at least {} samples each.",
            config.pipeline.min_samples_per_stream
        );
        return Ok(());
    };

    print_summary(&result);

    if let Some(path) = cfg.history_path {
        let store = HistoryStore::new(path, config.history.max_entries);
        let sample =
            PhaseGapSample::new(result.timestamp, result.phase_gap_degrees).with_source("analyze");
        let history = store.append(sample)?;
        info!("phase gap {:.3}° appended to {path}", result.phase_gap_degrees);
        println!("\nPhase gap appended to {path} ({} entries)", history.len());
    }

    if let Some(path) = cfg.output_path {
        super::write_json(path, &result)?;
    }
    Ok(())
}

fn print_summary(r: &GtiResult) {
    println!("  Streams:            {}", r.streams.join(", "));
    println!("  GTI:                {:.6}", r.gti_value);
    println!("  Alert level:        {}", r.alert_level);
    println!("  Median coherence:   {:.4}", r.coherence_median);
    println!("  Variance explained: {:.4}", r.variance_explained);
    println!("  Phase gap:          {:.3}°", r.phase_gap_degrees);
    println!("  Bayes factor:       {:.4}", r.bayes_factor);
    println!(
        "  Time to overlap:    {}",
        super::fmt_opt(gti_core::json::finite(r.time_to_overlap), 1)
    );

    if let Some(d) = &r.detailed_results {
        let header = pair_table_header();
        println!("\n  {header}");
        println!("  {}", "─".repeat(header.chars().count()));
        for p in &d.coherence.pairs {
            println!(
                "  {:<24} {:>10.4} {:>19.5} {:>9}",
                p.pair,
                p.peak_coherence,
                p.peak_frequency,
                if p.coherent { "yes" } else { "no" }
            );
        }
    }
}
