//! GTI compositor and alert classification.

use serde::{Deserialize, Serialize};

/// Discrete alert level, ordered from quiet to loud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Normal,
    Low,
    Medium,
    High,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds (inclusive) of each non-normal alert level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            low: 0.01,
            medium: 0.05,
            high: 0.1,
            critical: 0.2,
        }
    }
}

impl AlertThresholds {
    /// Cutoffs in ascending order.
    pub fn as_array(&self) -> [f64; 4] {
        [self.low, self.medium, self.high, self.critical]
    }

    /// Map a GTI value to its alert level. Non-finite input is `Normal`.
    pub fn classify(&self, gti: f64) -> AlertLevel {
        if gti >= self.critical {
            AlertLevel::Critical
        } else if gti >= self.high {
            AlertLevel::High
        } else if gti >= self.medium {
            AlertLevel::Medium
        } else if gti >= self.low {
            AlertLevel::Low
        } else {
            AlertLevel::Normal
        }
    }
}

/// The three factors of the index and their product.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GtiComponents {
    pub median_coherence: f64,
    pub variance_explained: f64,
    pub phase_factor: f64,
    pub gti: f64,
}

/// `coherence × variance_explained × exp(−|phase gap in radians|)`.
///
/// The first two factors are clamped into [0, 1] so the product stays in
/// [0, 1] even if an upstream estimate drifts by a rounding error.
pub fn compute_gti(median_coherence: f64, variance_explained: f64, phase_gap_degrees: f64) -> GtiComponents {
    let coherence = median_coherence.clamp(0.0, 1.0);
    let variance = variance_explained.clamp(0.0, 1.0);
    let phase_factor = (-phase_gap_degrees.to_radians().abs()).exp();
    GtiComponents {
        median_coherence: coherence,
        variance_explained: variance,
        phase_factor,
        gti: coherence * variance * phase_factor,
    }
}
