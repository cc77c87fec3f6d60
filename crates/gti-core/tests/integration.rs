//! Integration tests for gti-core.
//!
//! These tests drive the public API end to end:
//! streams → pipeline → result JSON, and history → store → ETA.

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use gti_core::{
    AlertLevel, AlertThresholds, ConvergenceStatus, EtaCalculator, EtaConfig, GtiPipeline,
    HistoryStore, PhaseGapSample, PhaseHistory, PipelineConfig, Sample, SpectralConfig,
    SpectralMethod, StabilityAssessment, StreamSet, analyze_phase_gap, compute_gti,
    estimate_coherence, prepare_residuals, whiten,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn sine_with_noise(n: usize, period: f64, phase: f64, noise: f64, rng: &mut StdRng) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            let v = (2.0 * PI * i as f64 / period + phase).sin() + rng.random_range(-noise..=noise);
            Sample::new(i as f64 * 60.0, v)
        })
        .collect()
}

fn white_noise(n: usize, rng: &mut StdRng) -> Vec<Sample> {
    (0..n)
        .map(|i| Sample::new(i as f64, rng.random_range(-1.0..1.0)))
        .collect()
}

fn daily_history(start: DateTime<Utc>, degrees: &[f64]) -> PhaseHistory {
    PhaseHistory::from_samples(
        degrees
            .iter()
            .enumerate()
            .map(|(i, &d)| PhaseGapSample::new(start + TimeDelta::days(i as i64), d))
            .collect(),
    )
}

fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn correlated_sines_are_coherent() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut streams = StreamSet::new();
    streams.insert("TAI", sine_with_noise(1024, 64.0, 0.0, 0.05, &mut rng));
    streams.insert("GNSS", sine_with_noise(1024, 64.0, 0.0, 0.05, &mut rng));

    let pipeline = GtiPipeline::new(PipelineConfig::default()).unwrap();
    let result = pipeline.process_streams(&streams, now()).unwrap().unwrap();
    assert!(
        result.coherence_median > 0.9,
        "coherence {}",
        result.coherence_median
    );
    assert!(
        result.variance_explained > 0.9,
        "variance explained {}",
        result.variance_explained
    );
    let diagnostics = result.detailed_results.unwrap();
    assert!(diagnostics.coherence.pairs[0].coherent);
    // Within one bin of the 256-sample segments.
    let peak = diagnostics.coherence.pairs[0].peak_frequency;
    assert!((peak - 1.0 / 64.0).abs() <= 1.0 / 256.0 + 1e-12, "peak at {peak}");
}

// Welch peak coherence of independent noise is biased upward by roughly
// ln(bins) / segments. 65 536 samples give 511 segments, enough for the 0.2
// bound to hold on the peak; shorter records are covered below.
#[test]
fn unrelated_noise_stays_normal() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut streams = StreamSet::new();
    streams.insert("PTA", white_noise(65_536, &mut rng));
    streams.insert("VLBI", white_noise(65_536, &mut rng));

    let pipeline = GtiPipeline::new(PipelineConfig::default()).unwrap();
    let result = pipeline.process_streams(&streams, now()).unwrap().unwrap();
    assert!(
        result.coherence_median < 0.2,
        "coherence {}",
        result.coherence_median
    );
    // The variance-ratio engine reports a fixed 0.25 for any input with spread.
    assert!(
        (0.1..=10.0).contains(&result.bayes_factor),
        "bayes factor {}",
        result.bayes_factor
    );
    assert_eq!(result.alert_level, AlertLevel::Normal);
}

#[test]
fn unrelated_noise_at_operational_length() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut streams = StreamSet::new();
    streams.insert("PTA", white_noise(2048, &mut rng));
    streams.insert("VLBI", white_noise(2048, &mut rng));

    // 15 Welch segments: the per-bin coherence stays low even though the
    // peak over 129 bins does not.
    let pipeline = GtiPipeline::new(PipelineConfig::default()).unwrap();
    let result = pipeline.process_streams(&streams, now()).unwrap().unwrap();
    let pair = &result.detailed_results.unwrap().coherence.pairs[0];
    let spectrum = &pair.spectrum.as_ref().unwrap().coherence;
    assert_eq!(spectrum.len(), 129);
    let typical = gti_stats::median(spectrum);
    assert!(typical < 0.2, "median bin coherence {typical}");
    assert!(pair.peak_coherence < 0.6, "peak {}", pair.peak_coherence);

    // Seven Slepian tapers per segment bring the peak itself under 0.2.
    let mut config = PipelineConfig::default();
    config.spectral.method = SpectralMethod::Multitaper;
    let pipeline = GtiPipeline::new(config).unwrap();
    let result = pipeline.process_streams(&streams, now()).unwrap().unwrap();
    assert!(
        result.coherence_median < 0.2,
        "multitaper coherence {}",
        result.coherence_median
    );
}

#[test]
fn linear_history_converges_now() {
    let degrees: Vec<f64> = (0..30).map(|i| 10.0 - 10.0 * i as f64 / 29.0).collect();
    let start = day(2025, 1, 1);
    let history = daily_history(start, &degrees);
    let last = start + TimeDelta::days(29);
    let calc = EtaCalculator::new(EtaConfig::default()).unwrap();

    let est = calc.from_history(&history, last).unwrap();
    assert!(est.slope_rad_per_day < 0.0);
    assert!(est.eta_days.unwrap().abs() < 1e-9);
    assert_eq!(est.convergence_status, ConvergenceStatus::Converging);

    let steps = gti_core::eta::step_etas(&history.sorted(), calc.config().max_eta_days);
    assert!(steps.iter().all(|p| p.slope_rad_per_day < 0.0));

    let stability = calc.stability(&history).unwrap();
    assert_eq!(stability.assessment, StabilityAssessment::Stable);
    assert!(stability.band_iqr_days <= 45.0);
}

#[test]
fn constant_stream_whitens_to_zero() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut streams = StreamSet::new();
    streams.insert("FLAT", (0..300).map(|i| Sample::new(i as f64, 4.2)).collect());
    streams.insert("TAI", sine_with_noise(300, 30.0, 0.0, 0.1, &mut rng));

    let residuals = prepare_residuals(&streams, 10);
    let whitened = whiten(&residuals);
    assert!(whitened["FLAT"].values.iter().all(|&v| v == 0.0));
    assert_eq!(whitened["FLAT"].values.len(), 300);

    let coherence = estimate_coherence(&whitened, &SpectralConfig::default(), 0.1, false);
    assert!(coherence.median_coherence.is_finite());

    let pipeline = GtiPipeline::new(PipelineConfig::default()).unwrap();
    let result = pipeline.process_streams(&streams, now()).unwrap().unwrap();
    assert!(result.gti_value.is_finite());
    assert!(result.variance_explained.is_finite());

    let mut both_flat = StreamSet::new();
    both_flat.insert("A", (0..50).map(|i| Sample::new(i as f64, 1.0)).collect());
    both_flat.insert("B", (0..50).map(|i| Sample::new(i as f64, -3.0)).collect());
    let result = pipeline.process_streams(&both_flat, now()).unwrap().unwrap();
    assert_eq!(result.gti_value, 0.0);
    serde_json::to_string(&result).unwrap();
}

#[test]
fn merge_keeps_existing_day() {
    let mut a = PhaseHistory::from_samples(vec![PhaseGapSample::new(day(2025, 1, 1), 5.0)]);
    let b = PhaseHistory::from_samples(vec![
        PhaseGapSample::new(day(2025, 1, 1) + TimeDelta::hours(6), 7.0),
        PhaseGapSample::new(day(2025, 1, 2), 3.0),
    ]);
    let report = a.merge_by_day(&b);
    assert_eq!(report.total, 2);
    assert_eq!(report.added, 1);
    assert_eq!(report.skipped, 1);
    let s = a.samples();
    assert_eq!(s[0].day(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    assert_eq!(s[0].phase_deg, 5.0);
    assert_eq!(s[1].phase_deg, 3.0);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn coherence_is_symmetric() {
    let mut rng = StdRng::seed_from_u64(21);
    let a: Vec<f64> = (0..700).map(|i| (i as f64 * 0.3).sin() + rng.random::<f64>()).collect();
    let b: Vec<f64> = (0..650).map(|i| (i as f64 * 0.3).cos() + rng.random::<f64>()).collect();
    let spectral = SpectralConfig::default();
    let (fa, ab) = gti_core::coherence::pair_spectrum(&a, &b, &spectral);
    let (fb, ba) = gti_core::coherence::pair_spectrum(&b, &a, &spectral);
    assert_eq!(fa, fb);
    assert_eq!(ab, ba);
}

#[test]
fn explained_variance_sums_to_one() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut streams = StreamSet::new();
    streams.insert("A", sine_with_noise(400, 40.0, 0.0, 0.5, &mut rng));
    streams.insert("B", sine_with_noise(400, 40.0, 0.3, 0.5, &mut rng));
    streams.insert("C", white_noise(400, &mut rng));

    let pipeline = GtiPipeline::new(PipelineConfig::default()).unwrap();
    let result = pipeline.process_streams(&streams, now()).unwrap().unwrap();
    assert!((0.0..=1.0).contains(&result.variance_explained));
    let ratios = result.detailed_results.unwrap().component_analysis.explained_variance_ratio;
    assert_eq!(ratios.len(), 3);
    assert!((ratios.iter().sum::<f64>() - 1.0).abs() < 1e-9);
}

#[test]
fn phase_gap_within_half_turn() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..25 {
        let n = rng.random_range(16..300);
        let a: Vec<f64> = (0..n).map(|_| rng.random_range(-2.0..2.0)).collect();
        let b: Vec<f64> = (0..n).map(|_| rng.random_range(-2.0..2.0)).collect();
        let gap = analyze_phase_gap(&a, &b).phase_gap_degrees;
        assert!((0.0..=180.0).contains(&gap), "gap {gap}");
    }
}

#[test]
fn gti_within_unit_interval() {
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..1000 {
        let c = compute_gti(
            rng.random::<f64>(),
            rng.random::<f64>(),
            rng.random_range(0.0..=180.0),
        );
        assert!((0.0..=1.0).contains(&c.gti));
    }
    assert_eq!(compute_gti(1.0, 1.0, 0.0).gti, 1.0);
}

#[test]
fn alert_level_monotone_in_gti() {
    let thresholds = AlertThresholds::default();
    let mut previous = AlertLevel::Normal;
    for i in 0..=10_000 {
        let level = thresholds.classify(i as f64 / 10_000.0);
        assert!(level >= previous, "{level} after {previous}");
        previous = level;
    }
    assert_eq!(previous, AlertLevel::Critical);
}

#[test]
fn merge_with_itself_is_idempotent() {
    let degrees: Vec<f64> = (0..40).map(|i| 30.0 - 0.5 * i as f64).collect();
    let original = daily_history(day(2024, 11, 1), &degrees);

    let mut merged = original.clone();
    let report = merged.merge_by_day(&original);
    assert_eq!(report.added, 0);
    assert_eq!(merged, original);

    let subset = PhaseHistory::from_samples(original.samples()[10..20].to_vec());
    merged.merge_by_day(&subset);
    assert_eq!(merged, original);

    let mut days: Vec<NaiveDate> = merged.samples().iter().map(PhaseGapSample::day).collect();
    days.dedup();
    assert_eq!(days.len(), merged.len());
}

#[test]
fn eta_sign_follows_slope() {
    let mut rng = StdRng::seed_from_u64(17);
    let calc = EtaCalculator::new(EtaConfig::default()).unwrap();
    let start = day(2024, 6, 1);

    let closing: Vec<f64> = (0..120)
        .map(|i| 60.0 - 0.3 * i as f64 + rng.random_range(-1.0..1.0))
        .collect();
    let as_of = start + TimeDelta::days(119);
    let est = calc.from_history(&daily_history(start, &closing), as_of).unwrap();
    assert!(est.slope_rad_per_day < 0.0);
    assert!(est.eta_days.unwrap() > 0.0);
    assert!(est.eta_utc.unwrap() > as_of);
    assert!(est.forecast().eta_date.unwrap() >= as_of.date_naive());

    let opening: Vec<f64> = (0..120)
        .map(|i| 10.0 + 0.3 * i as f64 + rng.random_range(-1.0..1.0))
        .collect();
    let est = calc.from_history(&daily_history(start, &opening), as_of).unwrap();
    assert!(est.slope_rad_per_day >= 0.0);
    assert!(est.eta_days.is_none());
    assert!(est.eta_utc.is_none());
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn store_roundtrip_and_bound() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("phase_gap_history.json");
    let store = HistoryStore::new(&path, 3);

    assert!(store.load().unwrap().is_empty());
    for i in 0..5 {
        store
            .append(PhaseGapSample::new(day(2025, 2, 1) + TimeDelta::days(i), i as f64))
            .unwrap();
    }
    let loaded = store.load().unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.samples()[0].phase_deg, 2.0);

    let text = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["history"][0]["as_of_utc"], "2025-02-03T00:00:00Z");
    assert_eq!(json["history"][0]["phase_deg"], 2.0);
}

#[test]
fn store_merge_dry_run_leaves_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    let store = HistoryStore::new(&path, 5000);
    store.append(PhaseGapSample::new(day(2025, 1, 1), 5.0)).unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    let backfill = daily_history(day(2024, 12, 30), &[9.0, 8.0, 7.0, 6.0]);
    let report = store.merge(&backfill, true).unwrap();
    assert_eq!(report.total, 4);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

    store.merge(&backfill, false).unwrap();
    let merged = store.load().unwrap();
    assert_eq!(merged.len(), 4);
    let jan1 = merged
        .samples()
        .iter()
        .find(|s| s.day() == NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
        .unwrap();
    assert_eq!(jan1.phase_deg, 5.0);
}

#[test]
fn concurrent_appends_are_serialised() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::new(dir.path().join("h.json"), 5000);
    std::thread::scope(|s| {
        for t in 0..4 {
            let store = &store;
            s.spawn(move || {
                for i in 0..10 {
                    let at = day(2025, 1, 1) + TimeDelta::hours(t * 10 + i);
                    store.append(PhaseGapSample::new(at, 1.0)).unwrap();
                }
            });
        }
    });
    assert_eq!(store.load().unwrap().len(), 40);
}

#[test]
fn malformed_history_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"[{"as_of_utc": "2025-01-01T00:00:00Z", "phase_deg": 1}]"#).unwrap();
    let store = HistoryStore::new(&path, 10);
    assert!(matches!(
        store.load(),
        Err(gti_core::GtiError::InvalidHistory(_))
    ));
}

#[test]
fn result_json_has_no_non_finite_numbers() {
    let mut rng = StdRng::seed_from_u64(8);
    let mut streams = StreamSet::new();
    streams.insert("A", white_noise(128, &mut rng));
    streams.insert("B", white_noise(128, &mut rng));
    let pipeline = GtiPipeline::new(PipelineConfig::default()).unwrap();
    let result = pipeline.process_streams(&streams, now()).unwrap().unwrap();
    let json = serde_json::to_string(&result).unwrap();
    assert!(!json.contains("NaN"));
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    if !result.time_to_overlap.is_finite() {
        assert!(value["time_to_overlap"].is_null());
    }
}
