//! Phase gap between the common component and the reference.

use gti_stats::{fit_line_indexed, instantaneous_phase, unwrap_phase, wrap_degrees};
use serde::Serialize;

use crate::json::{finite_or_null, finite_vec};

/// Smallest |phase| treated as a real gap when projecting overlap.
const MIN_GAP_DEGREES: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseAnalysis {
    /// |current phase|, in [0, 180].
    pub phase_gap_degrees: f64,
    /// Signed current phase, in (−180, 180].
    pub current_phase_degrees: f64,
    /// Least-squares slope of the unwrapped difference, degrees per sample.
    pub phase_gap_trend: f64,
    /// Samples until the gap closes at the current trend; +∞ if it is not closing.
    #[serde(serialize_with = "finite_or_null")]
    pub time_to_overlap: f64,
    #[serde(serialize_with = "finite_vec")]
    pub phase_diff_degrees: Vec<f64>,
}

impl PhaseAnalysis {
    /// Maximal gap, never closing. Used when there is no component to analyse.
    pub fn no_component() -> Self {
        Self {
            phase_gap_degrees: 180.0,
            current_phase_degrees: 180.0,
            phase_gap_trend: 0.0,
            time_to_overlap: f64::INFINITY,
            phase_diff_degrees: Vec::new(),
        }
    }
}

/// Hilbert-phase difference between `component` and `reference`.
///
/// Both series are truncated to the shorter length.
pub fn analyze_phase_gap(component: &[f64], reference: &[f64]) -> PhaseAnalysis {
    let n = component.len().min(reference.len());
    if n == 0 {
        return PhaseAnalysis::no_component();
    }

    let component_phase = instantaneous_phase(&component[..n]);
    let reference_phase = instantaneous_phase(&reference[..n]);
    let raw_diff: Vec<f64> = component_phase
        .iter()
        .zip(&reference_phase)
        .map(|(c, r)| c - r)
        .collect();
    let phase_diff_degrees: Vec<f64> = unwrap_phase(&raw_diff)
        .into_iter()
        .map(f64::to_degrees)
        .collect();

    let phase_gap_trend = fit_line_indexed(&phase_diff_degrees).map_or(0.0, |f| f.slope);
    let current_phase_degrees = phase_diff_degrees.last().copied().map_or(0.0, wrap_degrees);

    let time_to_overlap = if phase_gap_trend < 0.0 && current_phase_degrees.abs() > MIN_GAP_DEGREES {
        (current_phase_degrees / phase_gap_trend).abs()
    } else {
        f64::INFINITY
    };

    PhaseAnalysis {
        phase_gap_degrees: current_phase_degrees.abs(),
        current_phase_degrees,
        phase_gap_trend,
        time_to_overlap,
        phase_diff_degrees,
    }
}
