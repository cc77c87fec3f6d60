use chrono::Utc;
use gti_core::{EtaCalculator, EtaEstimate, EtaReport, GtiError, HistoryStore, SlopeUnits};
use log::{debug, warn};

use super::fmt_opt;

pub struct EtaCommandConfig<'a> {
    pub history_path: &'a str,
    pub config_path: Option<&'a str>,
    pub output_path: Option<&'a str>,
    pub gti: Option<f64>,
    /// Manual `(phase gap rad, slope)` in place of the history fit.
    pub manual: Option<(f64, f64)>,
    pub slope_units: SlopeUnits,
}

pub fn run(cfg: EtaCommandConfig<'_>) -> Result<(), GtiError> {
    let config = super::load_config(cfg.config_path)?;
    let calc = EtaCalculator::new(config.eta)?;
    let now = Utc::now();

    if let Some((current, slope)) = cfg.manual {
        debug!("manual ETA inputs: gap {current} rad, slope {slope} ({:?})", cfg.slope_units);
        let est = calc.instantaneous(current, slope, cfg.slope_units, now);
        println!("Instantaneous ETA from manual inputs\n");
        print_estimate(&est);
        if let Some(path) = cfg.output_path {
            super::write_json(path, &est)?;
        }
        return Ok(());
    }

    let store = HistoryStore::new(cfg.history_path, config.history.max_entries);
    let history = store.load()?;
    if history.is_empty() {
        warn!("{}: empty phase history", cfg.history_path);
        println!("No phase history in {}.", cfg.history_path);
        return Ok(());
    }
    println!(
        "Forecasting from {} sample(s) in {}\n",
        history.len(),
        cfg.history_path
    );

    let report = calc.report(&history, now, cfg.gti);
    print_report(&report);

    if let Some(path) = cfg.output_path {
        super::write_json(path, &report)?;
    }
    Ok(())
}

fn print_estimate(e: &EtaEstimate) {
    println!("  Status:        {}", e.convergence_status);
    println!("  Phase gap:     {:.4} rad ({:.3}°)", e.phase_gap_rad, e.phase_gap_degrees);
    println!("  Slope:         {:.4e} rad/day", e.slope_rad_per_day);
    println!("  ETA (days):    {}", fmt_opt(e.eta_days, 1));
    match e.eta_utc {
        Some(t) => println!("  ETA date:      {}", t.format("%Y-%m-%d")),
        None => println!("  ETA date:      —"),
    }
    for note in &e.notes {
        println!("  Note:          {note}");
    }
}

fn print_report(r: &EtaReport) {
    match &r.estimate {
        Some(e) => {
            print_estimate(e);
            println!("  Confidence:    {:?}", e.confidence);
            for gap in &e.long_gaps {
                println!(
                    "  Gap:           {:.1} days ({} → {})",
                    gap.days,
                    gap.start.format("%Y-%m-%d"),
                    gap.end.format("%Y-%m-%d")
                );
            }
        }
        None => println!("  Not enough history for a robust fit."),
    }

    println!();
    match &r.stability {
        Some(s) => {
            println!("  Stability:     {}", s.summary);
            println!(
                "  ETA band:      median {:.1} d, IQR {:.1} d over {} point(s)",
                s.eta_days_median, s.band_iqr_days, s.window_points
            );
            println!(
                "  Kendall τ:     {} (p = {})",
                fmt_opt(s.kendall_tau, 3),
                fmt_opt(s.kendall_pvalue, 4)
            );
        }
        None => println!("  Stability:     not enough closing steps"),
    }
    if let Some(p) = &r.placebo {
        println!(
            "  Placebo:       median {:.1} d, IQR {:.1} d ({} trials)",
            p.placebo_median_days, p.placebo_iqr_days, p.n_trials
        );
    }
    if let Some(b) = &r.bootstrap {
        println!(
            "  Bootstrap IQR: median {:.1} d, 95th pct {:.1} d",
            b.bootstrap_iqr_median_days, b.bootstrap_iqr_95pct_days
        );
    }
    if let Some(z) = &r.zero_reset {
        println!(
            "  Zero reset:    {} (confidence {:.2}, last sample {:.1} h old)",
            if z.is_zero_reset { "yes" } else { "no" },
            z.confidence,
            z.last_sample_age_hours
        );
    }
}
