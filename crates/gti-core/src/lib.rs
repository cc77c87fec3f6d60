//! # gti-core
//!
//! **Timing residuals from independent clocks, checked for a shared signal.**
//!
//! `gti-core` takes several timing streams (pulsar arrays, atomic time scales,
//! GNSS, VLBI), strips each down to a residual, and asks whether the residuals
//! move together. The answer is condensed into one number, the Global Timing
//! Index, and an alert level.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gti_core::{GtiPipeline, PipelineConfig, StreamSet};
//!
//! let mut streams = StreamSet::new();
//! streams.insert_series("TAI", &[0.0, 60.0, 120.0], &[1.0e-9, 1.2e-9, 0.9e-9]);
//! streams.insert_series("GNSS", &[0.0, 60.0, 120.0], &[2.0e-9, 2.1e-9, 1.7e-9]);
//!
//! let pipeline = GtiPipeline::new(PipelineConfig::default()).unwrap();
//! match pipeline.process(&streams).unwrap() {
//!     Some(result) => println!("GTI {} ({})", result.gti_value, result.alert_level),
//!     None => println!("not enough data yet"),
//! }
//! ```
//!
//! ## Architecture
//!
//! Streams → Residuals → Reference + Whitening → Coherence, Common component,
//! Phase gap, Evidence → Index
//!
//! Each stage is a plain function over owned arrays; [`GtiPipeline`] holds
//! the read-only configuration and wires them together. Degraded input (too
//! few streams, constant series) produces `Ok(None)` or zero sentinels, never
//! an error.
//!
//! Alongside the pipeline, [`history`] persists the phase gap over time and
//! [`eta`] forecasts when it will close.

pub mod coherence;
pub mod component;
pub mod config;
pub mod error;
pub mod eta;
pub mod evidence;
pub mod history;
pub mod index;
pub mod json;
pub mod phase;
pub mod pipeline;
pub mod residuals;
pub mod stream;

pub use coherence::{CoherenceReport, PairCoherence, PairSpectrum, estimate_coherence};
pub use component::{CommonComponent, extract_common_component};
pub use config::{
    EtaConfig, EvidenceMethod, GtiConfig, HistoryConfig, PipelineConfig, SpectralConfig,
    SpectralMethod,
};
pub use error::GtiError;
pub use eta::{
    ConvergenceDetector, ConvergenceEvent, ConvergenceStatus, EtaCalculator, EtaEstimate,
    EtaMethod, EtaReport, Forecast, ForecastConfidence, SlopeUnits, StabilityAssessment,
    StabilityReport, ZeroResetAssessment, instantaneous_eta,
};
pub use evidence::{
    EvidenceEstimator, EvidenceResult, ModelSelectionEvidence, VarianceRatioEvidence,
    estimator_for,
};
pub use history::{HistoryStore, MergeReport, PhaseGapSample, PhaseHistory, parse_timestamp};
pub use index::{AlertLevel, AlertThresholds, GtiComponents, compute_gti};
pub use phase::{PhaseAnalysis, analyze_phase_gap};
pub use pipeline::{Diagnostics, GtiPipeline, GtiResult};
pub use residuals::{
    REFERENCE_FREQUENCY_HZ, Reference, Residual, ResidualSet, StreamQuality, Whitened,
    WhitenedSet, build_reference, prepare_residuals, stream_quality, whiten, whiten_values,
};
pub use stream::{Sample, StreamSet};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
