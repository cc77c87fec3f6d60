//! How steady is the forecast? IQR bands, slope monotonicity, and two
//! baselines (placebo shuffles and bootstrap resamples) for judging whether
//! a narrow band is meaningful.

use chrono::{DateTime, Utc};
use gti_stats::{credible_interval, iqr, kendall_tau, median, percentile};
use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::trend::days_between;
use crate::config::EtaConfig;
use crate::history::PhaseGapSample;

/// IQR at or below this many days is a stable band.
pub const STABLE_IQR_DAYS: f64 = 45.0;
/// IQR above this many days is unstable.
pub const UNSTABLE_IQR_DAYS: f64 = 90.0;
/// |τ| beyond this qualifies a stable band with a slope trend.
const TAU_TREND: f64 = 0.3;
const MIN_KENDALL_POINTS: usize = 8;
const MIN_BOOTSTRAP_POINTS: usize = 5;

/// ETA implied by one consecutive pair of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EtaPoint {
    pub at: DateTime<Utc>,
    pub eta_days: f64,
    pub slope_rad_per_day: f64,
}

/// Per-step slopes between consecutive samples and the ETA each implies.
///
/// Only closing steps ending at a positive gap with an ETA in
/// `(0, max_eta_days)` are kept.
pub fn step_etas(samples: &[PhaseGapSample], max_eta_days: f64) -> Vec<EtaPoint> {
    samples
        .windows(2)
        .filter_map(|w| {
            let dt = days_between(w[0].as_of_utc, w[1].as_of_utc);
            if dt <= 0.0 {
                return None;
            }
            let prev = w[0].phase_deg.to_radians();
            let curr = w[1].phase_deg.to_radians();
            let slope = (curr - prev) / dt;
            if !(slope < 0.0 && curr > 0.0) {
                return None;
            }
            let eta = curr / -slope;
            (eta > 0.0 && eta < max_eta_days).then_some(EtaPoint {
                at: w[1].as_of_utc,
                eta_days: eta,
                slope_rad_per_day: slope,
            })
        })
        .collect()
}

/// Points within `lookback_days` of the newest one, or the last `fallback`
/// points when that window holds fewer than `min_points`.
pub fn recent_window(points: &[EtaPoint], lookback_days: f64, min_points: usize, fallback: usize) -> &[EtaPoint] {
    let Some(last) = points.last() else {
        return points;
    };
    let start = points
        .iter()
        .position(|p| days_between(p.at, last.at) <= lookback_days)
        .unwrap_or(points.len());
    if points.len() - start >= min_points {
        &points[start..]
    } else {
        &points[points.len().saturating_sub(fallback)..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StabilityAssessment {
    Stable,
    Moderate,
    Unstable,
}

impl StabilityAssessment {
    pub fn from_iqr(iqr_days: f64) -> Self {
        if iqr_days > UNSTABLE_IQR_DAYS {
            Self::Unstable
        } else if iqr_days > STABLE_IQR_DAYS {
            Self::Moderate
        } else {
            Self::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StabilityReport {
    pub eta_days_latest: f64,
    pub eta_days_median: f64,
    pub band_iqr_days: f64,
    pub slope_rad_per_day_latest: f64,
    pub kendall_tau: Option<f64>,
    pub kendall_pvalue: Option<f64>,
    pub n_points: usize,
    pub window_points: usize,
    pub assessment: StabilityAssessment,
    pub summary: String,
}

fn summarize(assessment: StabilityAssessment, tau: Option<f64>) -> String {
    match assessment {
        StabilityAssessment::Unstable => {
            "UNSTABLE - prediction varies widely (>90 days IQR)".to_string()
        }
        StabilityAssessment::Moderate => "MODERATE - some variability in prediction".to_string(),
        StabilityAssessment::Stable => {
            let mut s = "STABLE - consistent prediction band".to_string();
            match tau {
                Some(t) if t < -TAU_TREND => s.push_str(" with accelerating convergence"),
                Some(t) if t > TAU_TREND => s.push_str(" but slope increasing (diverging trend)"),
                _ => {}
            }
            s
        }
    }
}

/// IQR band and slope trend of per-step ETAs over the recent window.
///
/// `None` when fewer than `min_history_points` closing steps exist.
pub fn stability(samples: &[PhaseGapSample], cfg: &EtaConfig) -> Option<StabilityReport> {
    let points = step_etas(samples, cfg.max_eta_days);
    if points.len() < cfg.min_history_points {
        info!(
            "stability: {} valid ETA step(s), need {}",
            points.len(),
            cfg.min_history_points
        );
        return None;
    }
    let recent = recent_window(
        &points,
        cfg.stability_lookback_days,
        cfg.min_history_points,
        cfg.stability_fallback_points,
    );
    let latest = recent.last()?;
    let etas: Vec<f64> = recent.iter().map(|p| p.eta_days).collect();
    let band_iqr_days = iqr(&etas);

    let slopes: Vec<f64> = recent.iter().map(|p| p.slope_rad_per_day).collect();
    let kendall = if slopes.len() >= MIN_KENDALL_POINTS {
        let order: Vec<f64> = (0..slopes.len()).map(|i| i as f64).collect();
        kendall_tau(&order, &slopes)
    } else {
        None
    };
    let tau = kendall.map(|k| k.tau);
    let assessment = StabilityAssessment::from_iqr(band_iqr_days);

    Some(StabilityReport {
        eta_days_latest: latest.eta_days,
        eta_days_median: median(&etas),
        band_iqr_days,
        slope_rad_per_day_latest: latest.slope_rad_per_day,
        kendall_tau: tau,
        kendall_pvalue: kendall.map(|k| k.p_value),
        n_points: points.len(),
        window_points: recent.len(),
        assessment,
        summary: summarize(assessment, tau),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceboReport {
    pub placebo_median_days: f64,
    pub placebo_iqr_days: f64,
    pub n_trials: usize,
    pub sample_size: usize,
}

/// Shuffle ETAs against their timestamps and take the median of the last
/// `placebo_sample` each trial; the spread of those medians is what a
/// trendless history would produce.
pub fn placebo(samples: &[PhaseGapSample], cfg: &EtaConfig) -> Option<PlaceboReport> {
    let mut etas: Vec<f64> = step_etas(samples, cfg.max_eta_days)
        .iter()
        .map(|p| p.eta_days)
        .collect();
    let k = cfg.placebo_sample;
    if etas.len() < k {
        info!("placebo: {} valid ETA step(s), need {k}", etas.len());
        return None;
    }
    let mut rng = StdRng::seed_from_u64(cfg.placebo_seed);
    let medians: Vec<f64> = (0..cfg.placebo_trials)
        .map(|_| {
            etas.shuffle(&mut rng);
            median(&etas[etas.len() - k..])
        })
        .collect();
    Some(PlaceboReport {
        placebo_median_days: median(&medians),
        placebo_iqr_days: iqr(&medians),
        n_trials: cfg.placebo_trials,
        sample_size: k,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapReport {
    pub bootstrap_iqr_median_days: f64,
    pub bootstrap_iqr_95pct_days: f64,
    /// Central 95% interval of the resampled IQRs.
    pub iqr_interval_days: (f64, f64),
    pub n_boot: usize,
    pub sample_size: usize,
}

/// Resample the recent ETA window with replacement and collect its IQR.
pub fn bootstrap(samples: &[PhaseGapSample], cfg: &EtaConfig) -> Option<BootstrapReport> {
    let points = step_etas(samples, cfg.max_eta_days);
    let recent = recent_window(
        &points,
        cfg.stability_lookback_days,
        cfg.min_history_points,
        cfg.stability_fallback_points,
    );
    if recent.len() < MIN_BOOTSTRAP_POINTS {
        info!(
            "bootstrap: {} recent ETA step(s), need {MIN_BOOTSTRAP_POINTS}",
            recent.len()
        );
        return None;
    }
    let etas: Vec<f64> = recent.iter().map(|p| p.eta_days).collect();
    let n = etas.len();
    let mut rng = StdRng::seed_from_u64(cfg.bootstrap_seed);
    let mut draw = vec![0.0; n];
    let iqrs: Vec<f64> = (0..cfg.bootstrap_draws)
        .map(|_| {
            for slot in draw.iter_mut() {
                *slot = etas[rng.random_range(0..n)];
            }
            iqr(&draw)
        })
        .collect();
    let interval = credible_interval(&iqrs, 0.95)?;
    Some(BootstrapReport {
        bootstrap_iqr_median_days: median(&iqrs),
        bootstrap_iqr_95pct_days: percentile(&iqrs, 95.0),
        iqr_interval_days: (interval.lower, interval.upper),
        n_boot: cfg.bootstrap_draws,
        sample_size: n,
    })
}
