//! Trend fitting over phase-gap history.

use chrono::{DateTime, TimeDelta, Utc};
use gti_stats::{LineFit, fit_line, percentile};
use log::{debug, info};
use serde::Serialize;

use crate::config::EtaConfig;
use crate::history::PhaseGapSample;

pub(crate) const SECONDS_PER_DAY: f64 = 86_400.0;

pub(crate) fn days_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_milliseconds() as f64 / (SECONDS_PER_DAY * 1000.0)
}

/// `t + days`, or `None` when the result is not representable.
pub(crate) fn add_days(t: DateTime<Utc>, days: f64) -> Option<DateTime<Utc>> {
    if !days.is_finite() || days.abs() > 1e7 {
        return None;
    }
    let delta = TimeDelta::try_milliseconds((days * SECONDS_PER_DAY * 1000.0).round() as i64)?;
    t.checked_add_signed(delta)
}

/// Degrees to radians, then 2π-unwrapped as one continuous track.
pub fn unwrap_degrees(degrees: &[f64]) -> Vec<f64> {
    let rad: Vec<f64> = degrees.iter().map(|d| d.to_radians()).collect();
    gti_stats::unwrap_phase(&rad)
}

/// A spacing between consecutive samples longer than the allowed maximum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryGap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: f64,
}

/// Gaps longer than `max_gap_days` in chronologically sorted samples.
pub fn find_long_gaps(samples: &[PhaseGapSample], max_gap_days: Option<f64>) -> Vec<HistoryGap> {
    let Some(limit) = max_gap_days else {
        return Vec::new();
    };
    samples
        .windows(2)
        .filter_map(|w| {
            let days = days_between(w[0].as_of_utc, w[1].as_of_utc);
            (days > limit).then(|| HistoryGap {
                start: w[0].as_of_utc,
                end: w[1].as_of_utc,
                days,
            })
        })
        .collect()
}

/// Samples after the most recent long gap (all samples if there is none).
pub fn trailing_segment(samples: &[PhaseGapSample], max_gap_days: Option<f64>) -> &[PhaseGapSample] {
    let Some(limit) = max_gap_days else {
        return samples;
    };
    let start = samples
        .windows(2)
        .rposition(|w| days_between(w[0].as_of_utc, w[1].as_of_utc) > limit)
        .map_or(0, |i| i + 1);
    &samples[start..]
}

/// Indices of the trailing window: samples within `max_days` of the last
/// one, or the last `fallback` samples when that window holds fewer than
/// `min_points`.
fn window_indices(samples: &[PhaseGapSample], max_days: f64, min_points: usize, fallback: usize) -> Vec<usize> {
    let Some(last) = samples.last() else {
        return Vec::new();
    };
    let idx: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| days_between(s.as_of_utc, last.as_of_utc) <= max_days)
        .map(|(i, _)| i)
        .collect();
    if idx.len() >= min_points {
        idx
    } else {
        (samples.len().saturating_sub(fallback)..samples.len()).collect()
    }
}

/// Outcome of the outlier-trimmed linear fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobustFit {
    pub slope_rad_per_day: f64,
    pub intercept_rad: f64,
    /// Latest unwrapped phase in the window.
    pub phase_now_rad: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub window_points: usize,
    pub points_used: usize,
}

/// Least-squares line with iterative residual-percentile trimming.
fn trimmed_fit(mut x: Vec<f64>, mut y: Vec<f64>, cfg: &EtaConfig) -> Option<(LineFit, usize)> {
    let (lo_pct, hi_pct) = cfg.trim_percentiles;
    for _ in 0..cfg.trim_iterations {
        if x.len() < cfg.trim_min_points {
            break;
        }
        let Some(fit) = fit_line(&x, &y) else { break };
        let resid: Vec<f64> = x.iter().zip(&y).map(|(&xi, &yi)| yi - fit.predict(xi)).collect();
        let lo = percentile(&resid, lo_pct);
        let hi = percentile(&resid, hi_pct);
        let (kx, ky): (Vec<f64>, Vec<f64>) = x
            .iter()
            .zip(&y)
            .zip(&resid)
            .filter(|&(_, &r)| r >= lo && r <= hi)
            .map(|((&xi, &yi), _)| (xi, yi))
            .unzip();
        if kx.len() < 2 {
            break;
        }
        x = kx;
        y = ky;
    }
    fit_line(&x, &y).map(|f| (f, x.len()))
}

/// Robust slope of the unwrapped phase over the trailing window.
///
/// `samples` must be chronological. The window never reaches back across a
/// gap longer than `max_gap_days`. Returns `None` when the usable segment
/// has fewer than `min_fit_points` samples, spans less than `min_span_days`,
/// or has no time spread.
pub fn robust_fit(samples: &[PhaseGapSample], cfg: &EtaConfig) -> Option<RobustFit> {
    let segment = trailing_segment(samples, cfg.max_gap_days);
    if segment.len() < cfg.min_fit_points.max(2) {
        info!(
            "robust fit: {} sample(s) since the last long gap, need {}",
            segment.len(),
            cfg.min_fit_points.max(2)
        );
        return None;
    }

    let phase = unwrap_degrees(&segment.iter().map(|s| s.phase_deg).collect::<Vec<_>>());
    let idx = window_indices(segment, cfg.max_days, cfg.min_fit_points, cfg.fallback_points);
    let (first, last) = (*idx.first()?, *idx.last()?);
    let window_start = segment[first].as_of_utc;
    let window_end = segment[last].as_of_utc;

    let span = days_between(window_start, window_end);
    if span < cfg.min_span_days {
        info!("robust fit: window spans {span:.1} day(s), need {}", cfg.min_span_days);
        return None;
    }

    let x: Vec<f64> = idx.iter().map(|&i| days_between(window_start, segment[i].as_of_utc)).collect();
    let y: Vec<f64> = idx.iter().map(|&i| phase[i]).collect();
    let (fit, points_used) = trimmed_fit(x, y, cfg)?;
    debug!(
        "robust fit: slope {:.3e} rad/day from {points_used} of {} point(s)",
        fit.slope,
        idx.len()
    );

    Some(RobustFit {
        slope_rad_per_day: fit.slope,
        intercept_rad: fit.intercept,
        phase_now_rad: phase[last],
        window_start,
        window_end,
        window_points: idx.len(),
        points_used,
    })
}

/// Plain least-squares closing rate over a short recent window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClosureRate {
    pub slope_rad_per_day: f64,
    pub phase_gap_rad: f64,
}

/// Slope of the unwrapped phase over the last `closure_window_days`
/// (falling back to the last `closure_fallback_points` samples), and the
/// latest unwrapped phase.
pub fn closure_rate(samples: &[PhaseGapSample], cfg: &EtaConfig) -> Option<ClosureRate> {
    if samples.len() < 2 {
        return None;
    }
    let idx = window_indices(samples, cfg.closure_window_days, 2, cfg.closure_fallback_points);
    let first = *idx.first()?;
    let degrees: Vec<f64> = idx.iter().map(|&i| samples[i].phase_deg).collect();
    let y = unwrap_degrees(&degrees);
    let x: Vec<f64> = idx
        .iter()
        .map(|&i| days_between(samples[first].as_of_utc, samples[i].as_of_utc))
        .collect();
    let fit = fit_line(&x, &y)?;
    Some(ClosureRate {
        slope_rad_per_day: fit.slope,
        phase_gap_rad: *y.last()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn daily(degrees: &[f64]) -> Vec<PhaseGapSample> {
        degrees
            .iter()
            .enumerate()
            .map(|(i, &d)| PhaseGapSample::new(t0() + TimeDelta::days(i as i64), d))
            .collect()
    }

    fn linear(n: usize, start: f64, end: f64) -> Vec<f64> {
        (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect()
    }

    #[test]
    fn test_unwrap_degrees_crosses_wrap() {
        let u = unwrap_degrees(&[170.0, -170.0]);
        assert!((u[1] - 190.0_f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn test_robust_fit_linear() {
        let samples = daily(&linear(40, 20.0, 10.0));
        let fit = robust_fit(&samples, &EtaConfig::default()).unwrap();
        let expected = -(10.0_f64.to_radians()) / 39.0;
        assert!((fit.slope_rad_per_day - expected).abs() < 1e-12);
        assert!((fit.phase_now_rad - 10.0_f64.to_radians()).abs() < 1e-12);
        assert_eq!(fit.window_points, 40);
        assert!(fit.points_used >= 2 && fit.points_used <= 40);
    }

    #[test]
    fn test_robust_fit_trims_outlier() {
        let mut degs = linear(60, 30.0, 0.5);
        degs[30] += 40.0;
        let samples = daily(&degs);
        let fit = robust_fit(&samples, &EtaConfig::default()).unwrap();
        let expected = -(29.5_f64.to_radians()) / 59.0;
        assert!((fit.slope_rad_per_day - expected).abs() < 1e-3 * expected.abs());
    }

    #[test]
    fn test_robust_fit_too_few_points() {
        let samples = daily(&linear(15, 10.0, 5.0));
        assert!(robust_fit(&samples, &EtaConfig::default()).is_none());
    }

    #[test]
    fn test_window_respects_max_days() {
        let samples = daily(&linear(400, 50.0, 10.0));
        let cfg = EtaConfig {
            max_days: 100.0,
            ..EtaConfig::default()
        };
        let fit = robust_fit(&samples, &cfg).unwrap();
        assert_eq!(fit.window_points, 101);
    }

    #[test]
    fn test_window_fallback_when_sparse() {
        // Weekly samples: only 14 fall inside 90 days, so the last 200 are used.
        let samples: Vec<PhaseGapSample> = (0..30)
            .map(|i| PhaseGapSample::new(t0() + TimeDelta::days(7 * i), 40.0 - i as f64))
            .collect();
        let cfg = EtaConfig {
            max_days: 90.0,
            max_gap_days: None,
            ..EtaConfig::default()
        };
        let fit = robust_fit(&samples, &cfg).unwrap();
        assert_eq!(fit.window_points, 30);
    }

    #[test]
    fn test_long_gap_bounds_window() {
        let mut samples = daily(&linear(30, 90.0, 60.0));
        let resume = samples.last().unwrap().as_of_utc + TimeDelta::days(100);
        for i in 0..25 {
            samples.push(PhaseGapSample::new(resume + TimeDelta::days(i), 20.0 - 0.1 * i as f64));
        }
        let gaps = find_long_gaps(&samples, Some(45.0));
        assert_eq!(gaps.len(), 1);
        assert!((gaps[0].days - 100.0).abs() < 1e-9);

        let fit = robust_fit(&samples, &EtaConfig::default()).unwrap();
        assert_eq!(fit.window_start, resume);
        assert_eq!(fit.window_points, 25);
        assert!((fit.slope_rad_per_day + 0.1_f64.to_radians()).abs() < 1e-9);
    }

    #[test]
    fn test_min_span_days() {
        let samples = daily(&linear(30, 10.0, 0.0));
        let cfg = EtaConfig {
            min_span_days: 150.0,
            ..EtaConfig::default()
        };
        assert!(robust_fit(&samples, &cfg).is_none());
    }

    #[test]
    fn test_closure_rate() {
        let samples = daily(&linear(120, 30.0, 0.0));
        let rate = closure_rate(&samples, &EtaConfig::default()).unwrap();
        assert!(rate.slope_rad_per_day < 0.0);
        assert!(rate.phase_gap_rad.abs() < 1e-12);
        assert!(closure_rate(&samples[..1], &EtaConfig::default()).is_none());
    }

    #[test]
    fn test_add_days() {
        let t = add_days(t0(), 1.5).unwrap();
        assert_eq!(t, t0() + TimeDelta::hours(36));
        assert!(add_days(t0(), f64::INFINITY).is_none());
        assert!(add_days(t0(), 1e12).is_none());
    }
}
