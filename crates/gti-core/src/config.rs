//! Configuration for the pipeline, the forecaster, and the history store.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is
//! a valid configuration. Call [`GtiConfig::validate`] before use; the
//! pipeline and ETA calculator do so on construction.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GtiError;
use crate::index::AlertThresholds;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GtiConfig {
    pub pipeline: PipelineConfig,
    pub eta: EtaConfig,
    pub history: HistoryConfig,
}

/// Which estimator produces the pipeline's Bayes factor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMethod {
    /// Fixed noise-fraction variance split. Fast, but not real evidence.
    #[default]
    VarianceRatio,
    /// Gaussian noise vs. sinusoid-plus-noise marginal likelihoods.
    ModelSelection,
}

/// Cross-spectral estimator behind pairwise coherence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralMethod {
    /// Hann-windowed, overlapping segments.
    #[default]
    Welch,
    /// Slepian tapers on the same segments. Falls back to Welch when a
    /// segment is too short for the bandwidth.
    Multitaper,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub method: SpectralMethod,
    pub max_segment_len: usize,
    pub segment_divisor: usize,
    pub overlap_fraction: f64,
    /// Time-bandwidth product `NW` of the Slepian tapers.
    pub multitaper_bandwidth: f64,
    pub multitaper_tapers: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            method: SpectralMethod::default(),
            max_segment_len: 256,
            segment_divisor: 4,
            overlap_fraction: 0.5,
            multitaper_bandwidth: gti_stats::DEFAULT_TIME_BANDWIDTH,
            multitaper_tapers: gti_stats::DEFAULT_TAPERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_samples_per_stream: usize,
    pub spectral: SpectralConfig,
    /// Pairs with peak coherence at or above this are reported as coherent.
    pub coherence_threshold: f64,
    /// Bayes factor at or above this marks the signal model as favoured.
    pub bayes_factor_threshold: f64,
    pub alert_thresholds: AlertThresholds,
    pub evidence: EvidenceMethod,
    /// Share of pooled variance attributed to noise by the variance-ratio estimator.
    pub noise_fraction: f64,
    pub include_diagnostics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_samples_per_stream: 10,
            spectral: SpectralConfig::default(),
            coherence_threshold: 0.1,
            bayes_factor_threshold: 10.0,
            alert_thresholds: AlertThresholds::default(),
            evidence: EvidenceMethod::default(),
            noise_fraction: 0.8,
            include_diagnostics: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtaConfig {
    // Robust trend fit
    pub max_days: f64,
    pub min_fit_points: usize,
    pub fallback_points: usize,
    pub min_span_days: f64,
    pub trim_iterations: usize,
    pub trim_min_points: usize,
    pub trim_percentiles: (f64, f64),
    /// Spacing above this (days) counts as a gap the fit window never crosses.
    pub max_gap_days: Option<f64>,

    // Stability analysis
    pub stability_lookback_days: f64,
    pub stability_fallback_points: usize,
    pub min_history_points: usize,
    pub max_eta_days: f64,
    pub placebo_trials: usize,
    pub placebo_sample: usize,
    pub placebo_seed: u64,
    pub bootstrap_draws: usize,
    pub bootstrap_seed: u64,

    // Closure rate
    pub closure_window_days: f64,
    pub closure_fallback_points: usize,
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            max_days: 300.0,
            min_fit_points: 20,
            fallback_points: 200,
            min_span_days: 0.0,
            trim_iterations: 2,
            trim_min_points: 10,
            trim_percentiles: (5.0, 95.0),
            max_gap_days: Some(45.0),
            stability_lookback_days: 365.2422,
            stability_fallback_points: 50,
            min_history_points: 10,
            max_eta_days: 36_500.0,
            placebo_trials: 300,
            placebo_sample: 12,
            placebo_seed: 123,
            bootstrap_draws: 400,
            bootstrap_seed: 321,
            closure_window_days: 90.0,
            closure_fallback_points: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 5000 }
    }
}

impl GtiConfig {
    pub fn from_json_str(text: &str) -> Result<Self, GtiError> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `path`, or return defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, GtiError> {
        match path {
            Some(p) => Self::from_json_str(&std::fs::read_to_string(p)?),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), GtiError> {
        self.pipeline.validate()?;
        self.eta.validate()?;
        if self.history.max_entries == 0 {
            return Err(GtiError::config("history.max_entries", "must be at least 1"));
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), GtiError> {
        if self.min_samples_per_stream < 2 {
            return Err(GtiError::config(
                "pipeline.min_samples_per_stream",
                "must be at least 2",
            ));
        }
        let s = &self.spectral;
        if s.max_segment_len < 2 {
            return Err(GtiError::config(
                "pipeline.spectral.max_segment_len",
                "must be at least 2",
            ));
        }
        if s.segment_divisor == 0 {
            return Err(GtiError::config(
                "pipeline.spectral.segment_divisor",
                "must be positive",
            ));
        }
        if !(0.0..1.0).contains(&s.overlap_fraction) {
            return Err(GtiError::config(
                "pipeline.spectral.overlap_fraction",
                format!("{} is outside [0, 1)", s.overlap_fraction),
            ));
        }
        if !(s.multitaper_bandwidth.is_finite() && s.multitaper_bandwidth > 0.0) {
            return Err(GtiError::config(
                "pipeline.spectral.multitaper_bandwidth",
                format!("{} must be positive", s.multitaper_bandwidth),
            ));
        }
        if s.multitaper_tapers == 0 {
            return Err(GtiError::config(
                "pipeline.spectral.multitaper_tapers",
                "must be at least 1",
            ));
        }

        let cuts = self.alert_thresholds.as_array();
        if cuts.iter().any(|c| !c.is_finite()) {
            return Err(GtiError::config(
                "pipeline.alert_thresholds",
                "all thresholds must be finite",
            ));
        }
        if cuts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GtiError::config(
                "pipeline.alert_thresholds",
                format!("must be strictly increasing, got {cuts:?}"),
            ));
        }

        if !(self.noise_fraction > 0.0 && self.noise_fraction < 1.0) {
            return Err(GtiError::config(
                "pipeline.noise_fraction",
                format!("{} is outside (0, 1)", self.noise_fraction),
            ));
        }
        if !self.coherence_threshold.is_finite() || !self.bayes_factor_threshold.is_finite() {
            return Err(GtiError::config(
                "pipeline.coherence_threshold",
                "coherence and Bayes factor thresholds must be finite",
            ));
        }
        Ok(())
    }
}

impl EtaConfig {
    pub fn validate(&self) -> Result<(), GtiError> {
        let positive = [
            ("eta.max_days", self.max_days),
            ("eta.stability_lookback_days", self.stability_lookback_days),
            ("eta.max_eta_days", self.max_eta_days),
            ("eta.closure_window_days", self.closure_window_days),
        ];
        for (field, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(GtiError::config(field, format!("{v} must be positive")));
            }
        }
        if !(self.min_span_days.is_finite() && self.min_span_days >= 0.0) {
            return Err(GtiError::config("eta.min_span_days", "must be non-negative"));
        }
        if self.max_gap_days.is_some_and(|g| !(g.is_finite() && g > 0.0)) {
            return Err(GtiError::config("eta.max_gap_days", "must be positive"));
        }

        let counts = [
            ("eta.min_fit_points", self.min_fit_points),
            ("eta.fallback_points", self.fallback_points),
            ("eta.trim_min_points", self.trim_min_points),
            ("eta.stability_fallback_points", self.stability_fallback_points),
            ("eta.min_history_points", self.min_history_points),
            ("eta.placebo_trials", self.placebo_trials),
            ("eta.placebo_sample", self.placebo_sample),
            ("eta.bootstrap_draws", self.bootstrap_draws),
            ("eta.closure_fallback_points", self.closure_fallback_points),
        ];
        for (field, v) in counts {
            if v == 0 {
                return Err(GtiError::config(field, "must be at least 1"));
            }
        }

        let (lo, hi) = self.trim_percentiles;
        if !(0.0 <= lo && lo < hi && hi <= 100.0) {
            return Err(GtiError::config(
                "eta.trim_percentiles",
                format!("need 0 <= lo < hi <= 100, got ({lo}, {hi})"),
            ));
        }
        Ok(())
    }
}
