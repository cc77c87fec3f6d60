//! The eight-stage GTI pipeline.
//!
//! Streams → residuals → reference → whitening → pairwise coherence →
//! common component → phase gap → evidence → index.
//!
//! A [`GtiPipeline`] holds only read-only configuration, so one instance can
//! serve concurrent callers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::coherence::{CoherenceReport, estimate_coherence};
use crate::component::{CommonComponent, extract_common_component};
use crate::config::{GtiConfig, PipelineConfig};
use crate::error::{GtiError, ensure_finite};
use crate::evidence::{EvidenceEstimator, EvidenceResult, estimator_for};
use crate::index::{AlertLevel, GtiComponents, compute_gti};
use crate::json::finite_or_null;
use crate::phase::{PhaseAnalysis, analyze_phase_gap};
use crate::residuals::{
    Reference, StreamQuality, build_reference, prepare_residuals, stream_quality, whiten,
};
use crate::stream::StreamSet;

/// One pipeline snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GtiResult {
    pub timestamp: DateTime<Utc>,
    pub gti_value: f64,
    pub phase_gap_degrees: f64,
    pub coherence_median: f64,
    pub variance_explained: f64,
    pub bayes_factor: f64,
    /// Samples until phase overlap; `null` in JSON when not closing.
    #[serde(serialize_with = "finite_or_null")]
    pub time_to_overlap: f64,
    pub alert_level: AlertLevel,
    pub streams: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_results: Option<Diagnostics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub coherence: CoherenceReport,
    pub component_analysis: CommonComponent,
    pub phase_analysis: PhaseAnalysis,
    pub bayesian: EvidenceDiagnostics,
    pub index: GtiComponents,
    pub reference_frequency_hz: f64,
    pub stream_quality: BTreeMap<String, StreamQuality>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceDiagnostics {
    #[serde(flatten)]
    pub result: EvidenceResult,
    pub threshold: f64,
    pub signal_favoured: bool,
}

pub struct GtiPipeline {
    config: PipelineConfig,
    evidence: Box<dyn EvidenceEstimator>,
}

impl std::fmt::Debug for GtiPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GtiPipeline")
            .field("config", &self.config)
            .field("evidence", &self.evidence.method())
            .finish()
    }
}

impl GtiPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, GtiError> {
        config.validate()?;
        let evidence = estimator_for(config.evidence, config.noise_fraction);
        Ok(Self { config, evidence })
    }

    pub fn from_config(config: &GtiConfig) -> Result<Self, GtiError> {
        Self::new(config.pipeline.clone())
    }

    /// Swap the evidence engine, e.g. for a custom estimator.
    pub fn with_evidence(mut self, evidence: Box<dyn EvidenceEstimator>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline at the current time.
    pub fn process(&self, streams: &StreamSet) -> Result<Option<GtiResult>, GtiError> {
        self.process_streams(streams, Utc::now())
    }

    /// Run every stage over `streams`, stamping the result with `now`.
    ///
    /// Returns `Ok(None)` when there is nothing to analyse: no samples at
    /// all, or fewer than two streams with enough samples.
    pub fn process_streams(
        &self,
        streams: &StreamSet,
        now: DateTime<Utc>,
    ) -> Result<Option<GtiResult>, GtiError> {
        if streams.has_no_samples() {
            info!("no stream data available; GTI not computed");
            return Ok(None);
        }

        let residuals = prepare_residuals(streams, self.config.min_samples_per_stream);
        if residuals.len() < 2 {
            warn!(
                "{} usable stream(s) after filtering, need 2; GTI not computed",
                residuals.len()
            );
            return Ok(None);
        }
        debug!("processing {} stream(s)", residuals.len());

        let reference: Reference = build_reference(&residuals);
        let whitened = whiten(&residuals);

        let keep = self.config.include_diagnostics;
        let coherence = estimate_coherence(
            &whitened,
            &self.config.spectral,
            self.config.coherence_threshold,
            keep,
        );
        let component = extract_common_component(&whitened);
        let phase = analyze_phase_gap(&component.component, &reference.signal);
        let evidence = self.evidence.estimate(&whitened);

        let coherence_median = ensure_finite("coherence", "median_coherence", coherence.median_coherence)?;
        let variance_explained =
            ensure_finite("component", "variance_explained", component.variance_explained)?;
        let phase_gap_degrees = ensure_finite("phase", "phase_gap_degrees", phase.phase_gap_degrees)?;
        let bayes_factor = ensure_finite("evidence", "bayes_factor", evidence.bayes_factor)?;
        if phase.time_to_overlap.is_nan() {
            return Err(GtiError::numeric("phase", "time_to_overlap = NaN"));
        }

        let index = compute_gti(coherence_median, variance_explained, phase_gap_degrees);
        let gti_value = ensure_finite("compositor", "gti", index.gti)?;
        let alert_level = self.config.alert_thresholds.classify(gti_value);

        info!(
            "GTI {gti_value:.6} ({alert_level}); coherence {coherence_median:.3}, \
             variance explained {variance_explained:.3}, phase gap {phase_gap_degrees:.2}°"
        );

        let detailed_results = keep.then(|| Diagnostics {
            bayesian: EvidenceDiagnostics {
                signal_favoured: evidence.bayes_factor >= self.config.bayes_factor_threshold,
                threshold: self.config.bayes_factor_threshold,
                result: evidence,
            },
            coherence,
            component_analysis: component.clone(),
            phase_analysis: phase.clone(),
            index,
            reference_frequency_hz: reference.frequency,
            stream_quality: stream_quality(&residuals),
        });

        Ok(Some(GtiResult {
            timestamp: now,
            gti_value,
            phase_gap_degrees,
            coherence_median,
            variance_explained,
            bayes_factor,
            time_to_overlap: phase.time_to_overlap,
            alert_level,
            streams: residuals.keys().cloned().collect(),
            detailed_results,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvidenceMethod;
    use crate::stream::Sample;
    use std::f64::consts::PI;

    fn sine_stream(n: usize, period: f64, phase: f64) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new(i as f64 * 60.0, (2.0 * PI * i as f64 / period + phase).sin()))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_empty_input_is_none() {
        let p = GtiPipeline::new(PipelineConfig::default()).unwrap();
        assert!(p.process_streams(&StreamSet::new(), now()).unwrap().is_none());

        let mut empty = StreamSet::new();
        empty.insert("TAI", vec![]);
        assert!(p.process_streams(&empty, now()).unwrap().is_none());
    }

    #[test]
    fn test_single_usable_stream_is_none() {
        let p = GtiPipeline::new(PipelineConfig::default()).unwrap();
        let mut set = StreamSet::new();
        set.insert("TAI", sine_stream(100, 20.0, 0.0));
        set.insert("GNSS", sine_stream(5, 20.0, 0.0));
        assert!(p.process_streams(&set, now()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.alert_thresholds.high = 0.01;
        assert!(matches!(
            GtiPipeline::new(cfg),
            Err(GtiError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_result_fields_and_json() {
        let p = GtiPipeline::new(PipelineConfig::default()).unwrap();
        let mut set = StreamSet::new();
        set.insert("TAI", sine_stream(512, 32.0, 0.0));
        set.insert("GNSS", sine_stream(512, 32.0, 0.0));
        let r = p.process_streams(&set, now()).unwrap().unwrap();
        assert_eq!(r.timestamp, now());
        assert_eq!(r.streams, ["GNSS", "TAI"]);
        assert!((0.0..=1.0).contains(&r.gti_value));
        assert!((0.0..=180.0).contains(&r.phase_gap_degrees));

        let json = serde_json::to_value(&r).unwrap();
        for key in [
            "timestamp",
            "gti_value",
            "phase_gap_degrees",
            "coherence_median",
            "variance_explained",
            "bayes_factor",
            "time_to_overlap",
            "alert_level",
            "detailed_results",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json["detailed_results"]["bayesian"]["bayes_factor"].is_number());
        let quality = &json["detailed_results"]["stream_quality"];
        assert!(quality["TAI"]["noise_std"].as_f64().unwrap() > 0.0);
        assert!(quality["GNSS"]["snr"].is_number());
        assert_eq!(quality["GNSS"]["outliers"], 0);
    }

    #[test]
    fn test_diagnostics_can_be_omitted() {
        let cfg = PipelineConfig {
            include_diagnostics: false,
            ..PipelineConfig::default()
        };
        let p = GtiPipeline::new(cfg).unwrap();
        let mut set = StreamSet::new();
        set.insert("A", sine_stream(200, 25.0, 0.0));
        set.insert("B", sine_stream(200, 25.0, 1.0));
        let r = p.process_streams(&set, now()).unwrap().unwrap();
        assert!(r.detailed_results.is_none());
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("detailed_results").is_none());
    }

    #[test]
    fn test_model_selection_engine() {
        let cfg = PipelineConfig {
            evidence: EvidenceMethod::ModelSelection,
            ..PipelineConfig::default()
        };
        let p = GtiPipeline::new(cfg).unwrap();
        let mut set = StreamSet::new();
        set.insert("PTA", sine_stream(256, 10.0, 0.0));
        set.insert("VLBI", sine_stream(256, 10.0, 0.2));
        let r = p.process_streams(&set, now()).unwrap().unwrap();
        let d = r.detailed_results.unwrap();
        assert_eq!(d.bayesian.result.method, EvidenceMethod::ModelSelection);
        assert!(d.bayesian.signal_favoured);
        assert!(r.bayes_factor > 10.0);
    }
}
