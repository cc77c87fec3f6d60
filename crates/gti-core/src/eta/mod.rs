//! Time-to-convergence forecasting from phase-gap history.
//!
//! The point estimate comes from a robust linear fit of the unwrapped phase
//! over a trailing window ([`EtaCalculator::from_history`]). Separate
//! analyses judge how far that estimate can be trusted:
//!
//! - [`stability`]: IQR band of per-step ETAs and Kendall's τ of the slopes
//! - [`placebo`]: medians of shuffled ETAs, the trendless baseline
//! - [`bootstrap`]: resampled IQRs of the recent ETA window
//!
//! Not closing (slope ≥ 0) is a valid outcome with no ETA, not an error.

mod events;
mod stability;
mod trend;

pub use events::{
    ConvergenceDetector, ConvergenceEvent, EventEvidence, Verification, ZeroResetAssessment,
    assess_zero_reset,
};
pub use stability::{
    BootstrapReport, EtaPoint, PlaceboReport, StabilityAssessment, StabilityReport, bootstrap,
    placebo, recent_window, stability, step_etas,
};
pub use trend::{
    ClosureRate, HistoryGap, RobustFit, closure_rate, find_long_gaps, robust_fit,
    trailing_segment, unwrap_degrees,
};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use gti_stats::median;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::EtaConfig;
use crate::error::GtiError;
use crate::history::{PhaseGapSample, PhaseHistory};
use crate::json::opt_finite_or_null;
use crate::pipeline::GtiResult;
use trend::{SECONDS_PER_DAY, add_days, days_between};

/// Samples above which a forecast is reported with medium confidence.
const MEDIUM_CONFIDENCE_SAMPLES: usize = 200;
/// Most recent GTI results used for the result-history slope.
const RECENT_RESULTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConvergenceStatus {
    Converging,
    Diverging,
    Stable,
}

impl ConvergenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Converging => "CONVERGING",
            Self::Diverging => "DIVERGING",
            Self::Stable => "STABLE",
        }
    }
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeUnits {
    RadPerSec,
    RadPerDay,
}

impl SlopeUnits {
    fn per_day(self, slope: f64) -> f64 {
        match self {
            Self::RadPerSec => slope * SECONDS_PER_DAY,
            Self::RadPerDay => slope,
        }
    }
}

impl FromStr for SlopeUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rad_per_sec" => Ok(Self::RadPerSec),
            "rad_per_day" => Ok(Self::RadPerDay),
            other => Err(format!("unknown slope units '{other}' (rad_per_sec | rad_per_day)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastConfidence {
    Low,
    Medium,
}

impl ForecastConfidence {
    pub fn for_samples(n: usize) -> Self {
        if n > MEDIUM_CONFIDENCE_SAMPLES {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtaMethod {
    RobustFit,
    RecentResults,
    Instantaneous,
}

/// ETA implied by a single phase gap and closing rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantEta {
    #[serde(serialize_with = "opt_finite_or_null")]
    pub eta_days: Option<f64>,
    pub convergence_status: ConvergenceStatus,
    pub note: Option<String>,
}

/// `|phase_gap_rad| / -slope`, classified.
///
/// A slope at or above zero has no ETA. An ETA beyond `max_eta_days` is
/// reported but classed as stable.
pub fn instantaneous_eta(
    phase_gap_rad: f64,
    slope: f64,
    units: SlopeUnits,
    max_eta_days: f64,
) -> InstantEta {
    let slope_per_day = units.per_day(slope);
    if !(slope_per_day < 0.0) || !phase_gap_rad.is_finite() {
        return InstantEta {
            eta_days: None,
            convergence_status: ConvergenceStatus::Diverging,
            note: Some("phase gap is not closing".to_string()),
        };
    }
    let eta = phase_gap_rad.abs() / -slope_per_day;
    let (convergence_status, note) = if eta > max_eta_days {
        (
            ConvergenceStatus::Stable,
            Some(format!("ETA exceeds {max_eta_days:.0} days; effectively stable")),
        )
    } else if eta < 1.0 {
        (
            ConvergenceStatus::Converging,
            Some("convergence imminent (< 1 day)".to_string()),
        )
    } else {
        (ConvergenceStatus::Converging, None)
    };
    InstantEta {
        eta_days: Some(eta),
        convergence_status,
        note,
    }
}

/// The compact forecast handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    #[serde(serialize_with = "opt_finite_or_null")]
    pub eta_days: Option<f64>,
    pub eta_date: Option<NaiveDate>,
    pub confidence: ForecastConfidence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtaEstimate {
    pub as_of: DateTime<Utc>,
    pub method: EtaMethod,
    pub phase_gap_rad: f64,
    pub phase_gap_degrees: f64,
    pub slope_rad_per_day: f64,
    pub slope_rad_per_sec: f64,
    #[serde(serialize_with = "opt_finite_or_null")]
    pub eta_days: Option<f64>,
    pub eta_utc: Option<DateTime<Utc>>,
    pub convergence_status: ConvergenceStatus,
    pub confidence: ForecastConfidence,
    pub n_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<RobustFit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub long_gaps: Vec<HistoryGap>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl EtaEstimate {
    fn build(
        as_of: DateTime<Utc>,
        method: EtaMethod,
        phase_gap_rad: f64,
        slope_rad_per_day: f64,
        n_samples: usize,
        max_eta_days: f64,
    ) -> Self {
        let instant = instantaneous_eta(phase_gap_rad, slope_rad_per_day, SlopeUnits::RadPerDay, max_eta_days);
        let eta_utc = instant.eta_days.and_then(|d| add_days(as_of, d));
        Self {
            as_of,
            method,
            phase_gap_rad,
            phase_gap_degrees: phase_gap_rad.to_degrees(),
            slope_rad_per_day,
            slope_rad_per_sec: slope_rad_per_day / SECONDS_PER_DAY,
            eta_days: instant.eta_days,
            eta_utc,
            convergence_status: instant.convergence_status,
            confidence: ForecastConfidence::for_samples(n_samples),
            n_samples,
            fit: None,
            long_gaps: Vec::new(),
            notes: instant.note.into_iter().collect(),
        }
    }

    pub fn forecast(&self) -> Forecast {
        Forecast {
            eta_days: self.eta_days,
            eta_date: self.eta_utc.map(|t| t.date_naive()),
            confidence: self.confidence,
        }
    }
}

/// Everything `eta` reports for one history snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtaReport {
    pub estimate: Option<EtaEstimate>,
    pub forecast: Option<Forecast>,
    pub stability: Option<StabilityReport>,
    pub placebo: Option<PlaceboReport>,
    pub bootstrap: Option<BootstrapReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zero_reset: Option<ZeroResetAssessment>,
}

#[derive(Debug, Clone)]
pub struct EtaCalculator {
    config: EtaConfig,
}

impl EtaCalculator {
    pub fn new(config: EtaConfig) -> Result<Self, GtiError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EtaConfig {
        &self.config
    }

    /// Robust-fit ETA from the stored history.
    ///
    /// `None` when there is not enough history for a fit. A history that is
    /// not closing yields an estimate with no ETA.
    pub fn from_history(&self, history: &PhaseHistory, now: DateTime<Utc>) -> Option<EtaEstimate> {
        let samples = history.sorted();
        let long_gaps = find_long_gaps(&samples, self.config.max_gap_days);
        for gap in &long_gaps {
            warn!(
                "phase history gap of {:.1} days ({} to {})",
                gap.days, gap.start, gap.end
            );
        }
        let fit = robust_fit(&samples, &self.config)?;

        let mut est = EtaEstimate::build(
            now,
            EtaMethod::RobustFit,
            fit.phase_now_rad,
            fit.slope_rad_per_day,
            samples.len(),
            self.config.max_eta_days,
        );
        if !long_gaps.is_empty() {
            est.notes
                .push(format!("{} long gap(s); fit uses data after the last", long_gaps.len()));
        }
        est.fit = Some(fit);
        est.long_gaps = long_gaps;
        info!(
            "ETA {}: slope {:.3e} rad/day, eta {:?} day(s)",
            est.convergence_status, est.slope_rad_per_day, est.eta_days
        );
        Some(est)
    }

    /// ETA from the median per-day slope across the most recent results.
    pub fn from_results(&self, results: &[GtiResult], now: DateTime<Utc>) -> Option<EtaEstimate> {
        let mut recent: Vec<&GtiResult> = results.iter().collect();
        recent.sort_by_key(|r| r.timestamp);
        let recent = &recent[recent.len().saturating_sub(RECENT_RESULTS)..];

        let slopes: Vec<f64> = recent
            .windows(2)
            .filter_map(|w| {
                let dt = days_between(w[0].timestamp, w[1].timestamp);
                (dt > 0.0).then(|| {
                    (w[1].phase_gap_degrees - w[0].phase_gap_degrees).to_radians() / dt
                })
            })
            .filter(|s| s.is_finite())
            .collect();
        if slopes.is_empty() {
            info!("ETA from results: {} result(s), no usable slope", recent.len());
            return None;
        }
        let latest = recent.last()?;
        Some(EtaEstimate::build(
            now,
            EtaMethod::RecentResults,
            latest.phase_gap_degrees.to_radians(),
            median(&slopes),
            results.len(),
            self.config.max_eta_days,
        ))
    }

    /// ETA from a manually supplied gap and slope.
    pub fn instantaneous(
        &self,
        phase_gap_rad: f64,
        slope: f64,
        units: SlopeUnits,
        now: DateTime<Utc>,
    ) -> EtaEstimate {
        EtaEstimate::build(
            now,
            EtaMethod::Instantaneous,
            phase_gap_rad,
            units.per_day(slope),
            0,
            self.config.max_eta_days,
        )
    }

    pub fn stability(&self, history: &PhaseHistory) -> Option<StabilityReport> {
        stability(&history.sorted(), &self.config)
    }

    /// Stability of the per-step ETAs implied by a run of GTI results.
    pub fn stability_from_results(&self, results: &[GtiResult]) -> Option<StabilityReport> {
        let mut samples: Vec<PhaseGapSample> = results
            .iter()
            .map(|r| PhaseGapSample::new(r.timestamp, r.phase_gap_degrees))
            .collect();
        samples.sort_by_key(|s| s.as_of_utc);
        stability(&samples, &self.config)
    }

    pub fn placebo(&self, history: &PhaseHistory) -> Option<PlaceboReport> {
        placebo(&history.sorted(), &self.config)
    }

    pub fn bootstrap(&self, history: &PhaseHistory) -> Option<BootstrapReport> {
        bootstrap(&history.sorted(), &self.config)
    }

    pub fn closure_rate(&self, history: &PhaseHistory) -> Option<ClosureRate> {
        closure_rate(&history.sorted(), &self.config)
    }

    pub fn assess_zero_reset(
        &self,
        history: &PhaseHistory,
        gti: f64,
        now: DateTime<Utc>,
    ) -> Option<ZeroResetAssessment> {
        assess_zero_reset(&history.sorted(), gti, now, &self.config)
    }

    /// Point estimate plus every sanity analysis, with the zero-reset check
    /// when a current GTI value is known.
    pub fn report(&self, history: &PhaseHistory, now: DateTime<Utc>, gti: Option<f64>) -> EtaReport {
        let estimate = self.from_history(history, now);
        EtaReport {
            forecast: estimate.as_ref().map(EtaEstimate::forecast),
            estimate,
            stability: self.stability(history),
            placebo: self.placebo(history),
            bootstrap: self.bootstrap(history),
            zero_reset: gti.and_then(|g| self.assess_zero_reset(history, g, now)),
        }
    }
}
