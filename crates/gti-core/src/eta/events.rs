//! Convergence events and the zero-reset check.

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};
use serde::Serialize;

use super::trend::{closure_rate, days_between};
use super::{ConvergenceStatus, EtaEstimate};
use crate::config::EtaConfig;
use crate::history::PhaseGapSample;
use crate::index::AlertLevel;
use crate::pipeline::GtiResult;

const CONFIRMED_GAP_DEGREES: f64 = 0.01;
const CONFIRMED_COHERENCE: f64 = 0.7;

const ZERO_RESET_GAP_DEGREES: f64 = 1.0;
const ZERO_RESET_MIN_GTI: f64 = 0.8;
const ZERO_RESET_MAX_AGE_HOURS: f64 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verification {
    Confirmed,
    Probable,
}

/// GTI scalars at the moment of an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEvidence {
    pub phase_gap_degrees: f64,
    pub variance_explained: f64,
    pub bayes_factor: f64,
    pub alert_level: AlertLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceEvent {
    pub event_utc: DateTime<Utc>,
    pub phase_gap_at_event: f64,
    pub gti_value: f64,
    pub coherence: f64,
    pub predicted_utc: Option<DateTime<Utc>>,
    /// Positive when the event came later than predicted.
    pub prediction_error_hours: Option<f64>,
    pub verification: Verification,
    pub evidence: EventEvidence,
}

/// Flags results whose phase gap has closed below a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceDetector {
    pub threshold_degrees: f64,
    /// No second event within this interval of a recorded one.
    pub dedupe_window: TimeDelta,
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self {
            threshold_degrees: 0.05,
            dedupe_window: TimeDelta::hours(6),
        }
    }
}

impl ConvergenceDetector {
    /// An event for `result`, or `None` when the gap is still open or an
    /// event was already recorded within the dedupe window.
    pub fn detect(
        &self,
        result: &GtiResult,
        recent_events: &[ConvergenceEvent],
        latest_forecast: Option<&EtaEstimate>,
    ) -> Option<ConvergenceEvent> {
        if !(result.phase_gap_degrees <= self.threshold_degrees) {
            return None;
        }
        let at = result.timestamp;
        if recent_events
            .iter()
            .any(|e| (at - e.event_utc).abs() < self.dedupe_window)
        {
            debug!("convergence at {at} within dedupe window; skipped");
            return None;
        }

        let verification = if result.phase_gap_degrees < CONFIRMED_GAP_DEGREES
            && result.coherence_median > CONFIRMED_COHERENCE
        {
            Verification::Confirmed
        } else {
            Verification::Probable
        };
        let predicted_utc = latest_forecast
            .filter(|f| f.convergence_status == ConvergenceStatus::Converging)
            .and_then(|f| f.eta_utc);
        let prediction_error_hours =
            predicted_utc.map(|p| (at - p).num_milliseconds() as f64 / 3_600_000.0);

        info!(
            "convergence event at {at}: gap {:.4}°, {:?}",
            result.phase_gap_degrees, verification
        );
        Some(ConvergenceEvent {
            event_utc: at,
            phase_gap_at_event: result.phase_gap_degrees,
            gti_value: result.gti_value,
            coherence: result.coherence_median,
            predicted_utc,
            prediction_error_hours,
            verification,
            evidence: EventEvidence {
                phase_gap_degrees: result.phase_gap_degrees,
                variance_explained: result.variance_explained,
                bayes_factor: result.bayes_factor,
                alert_level: result.alert_level,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZeroResetAssessment {
    pub is_zero_reset: bool,
    pub phase_gap_deg: f64,
    pub slope_rad_per_day: f64,
    pub gti: f64,
    pub last_sample_age_hours: f64,
    pub confidence: f64,
}

/// Is the phase gap closing onto zero right now, with a strong index and
/// fresh data?
pub fn assess_zero_reset(
    samples: &[PhaseGapSample],
    gti: f64,
    now: DateTime<Utc>,
    cfg: &EtaConfig,
) -> Option<ZeroResetAssessment> {
    let rate = closure_rate(samples, cfg)?;
    let last = samples.last()?;
    let phase_gap_deg = rate.phase_gap_rad.to_degrees();
    let last_sample_age_hours = days_between(last.as_of_utc, now) * 24.0;
    let slope_deg_per_day = rate.slope_rad_per_day.to_degrees();

    let is_zero_reset = rate.slope_rad_per_day < 0.0
        && phase_gap_deg.abs() < ZERO_RESET_GAP_DEGREES
        && gti >= ZERO_RESET_MIN_GTI
        && last_sample_age_hours <= ZERO_RESET_MAX_AGE_HOURS;
    let confidence = slope_deg_per_day.abs().min(1.0) * gti.clamp(0.0, 1.0);

    Some(ZeroResetAssessment {
        is_zero_reset,
        phase_gap_deg,
        slope_rad_per_day: rate.slope_rad_per_day,
        gti,
        last_sample_age_hours,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eta::{EtaMethod, ForecastConfidence};
    use chrono::TimeZone;

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + TimeDelta::hours(h)
    }

    fn result(at: DateTime<Utc>, gap: f64, coherence: f64) -> GtiResult {
        GtiResult {
            timestamp: at,
            gti_value: 0.9,
            phase_gap_degrees: gap,
            coherence_median: coherence,
            variance_explained: 0.95,
            bayes_factor: 40.0,
            time_to_overlap: f64::INFINITY,
            alert_level: AlertLevel::Critical,
            streams: vec!["A".into(), "B".into()],
            detailed_results: None,
        }
    }

    fn forecast(eta_utc: DateTime<Utc>, status: ConvergenceStatus) -> EtaEstimate {
        EtaEstimate {
            as_of: at(0),
            method: EtaMethod::RobustFit,
            phase_gap_rad: 0.01,
            phase_gap_degrees: 0.57,
            slope_rad_per_day: -0.01,
            slope_rad_per_sec: -0.01 / 86_400.0,
            eta_days: Some(1.0),
            eta_utc: Some(eta_utc),
            convergence_status: status,
            confidence: ForecastConfidence::Low,
            n_samples: 30,
            fit: None,
            long_gaps: Vec::new(),
            notes: Vec::new(),
        }
    }

    #[test]
    fn test_open_gap_is_not_an_event() {
        let d = ConvergenceDetector::default();
        assert!(d.detect(&result(at(0), 0.2, 0.9), &[], None).is_none());
        assert!(d.detect(&result(at(0), f64::NAN, 0.9), &[], None).is_none());
    }

    #[test]
    fn test_verification_levels() {
        let d = ConvergenceDetector::default();
        let e = d.detect(&result(at(0), 0.005, 0.8), &[], None).unwrap();
        assert_eq!(e.verification, Verification::Confirmed);
        assert!(e.predicted_utc.is_none());
        let e = d.detect(&result(at(0), 0.03, 0.8), &[], None).unwrap();
        assert_eq!(e.verification, Verification::Probable);
        let e = d.detect(&result(at(0), 0.005, 0.5), &[], None).unwrap();
        assert_eq!(e.verification, Verification::Probable);
    }

    #[test]
    fn test_dedupe_window() {
        let d = ConvergenceDetector::default();
        let first = d.detect(&result(at(0), 0.01, 0.9), &[], None).unwrap();
        let recent = [first];
        assert!(d.detect(&result(at(5), 0.01, 0.9), &recent, None).is_none());
        assert!(d.detect(&result(at(7), 0.01, 0.9), &recent, None).is_some());
    }

    #[test]
    fn test_prediction_error() {
        let d = ConvergenceDetector::default();
        let f = forecast(at(10), ConvergenceStatus::Converging);
        let e = d.detect(&result(at(13), 0.01, 0.9), &[], Some(&f)).unwrap();
        assert_eq!(e.predicted_utc, Some(at(10)));
        assert!((e.prediction_error_hours.unwrap() - 3.0).abs() < 1e-9);

        let f = forecast(at(10), ConvergenceStatus::Stable);
        let e = d.detect(&result(at(13), 0.01, 0.9), &[], Some(&f)).unwrap();
        assert!(e.prediction_error_hours.is_none());
    }

    fn closing_history(end: DateTime<Utc>, from: f64, to: f64, n: i64) -> Vec<PhaseGapSample> {
        (0..n)
            .map(|i| {
                let frac = i as f64 / (n - 1) as f64;
                PhaseGapSample::new(end - TimeDelta::days(n - 1 - i), from + (to - from) * frac)
            })
            .collect()
    }

    #[test]
    fn test_zero_reset_detected() {
        let now = at(12);
        let samples = closing_history(at(0), 20.0, 0.5, 40);
        let z = assess_zero_reset(&samples, 0.9, now, &EtaConfig::default()).unwrap();
        assert!(z.is_zero_reset);
        assert!((z.phase_gap_deg - 0.5).abs() < 1e-9);
        assert!((z.last_sample_age_hours - 12.0).abs() < 1e-9);
        assert!((z.confidence - 0.5 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_zero_reset_rejections() {
        let cfg = EtaConfig::default();
        let samples = closing_history(at(0), 20.0, 0.5, 40);
        assert!(!assess_zero_reset(&samples, 0.5, at(1), &cfg).unwrap().is_zero_reset);
        assert!(!assess_zero_reset(&samples, 0.9, at(100), &cfg).unwrap().is_zero_reset);
        let far = closing_history(at(0), 40.0, 10.0, 40);
        assert!(!assess_zero_reset(&far, 0.9, at(1), &cfg).unwrap().is_zero_reset);
        assert!(assess_zero_reset(&samples[..1], 0.9, at(1), &cfg).is_none());
    }
}
