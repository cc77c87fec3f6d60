//! Pairwise cross-spectral coherence across whitened streams.

use gti_stats::{WelchParams, coherence, median, multitaper_coherence};
use log::{debug, warn};
use serde::Serialize;

use crate::config::{SpectralConfig, SpectralMethod};
use crate::json::finite_vec;
use crate::residuals::WhitenedSet;

/// Coherence of one unordered stream pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairCoherence {
    pub pair: String,
    pub peak_coherence: f64,
    /// Cycles per sample.
    pub peak_frequency: f64,
    pub coherent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectrum: Option<PairSpectrum>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairSpectrum {
    #[serde(serialize_with = "finite_vec")]
    pub frequencies: Vec<f64>,
    #[serde(serialize_with = "finite_vec")]
    pub coherence: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoherenceReport {
    pub median_coherence: f64,
    pub pairs: Vec<PairCoherence>,
}

/// Coherence of two series truncated to their common length, estimated
/// with the configured spectral method.
///
/// Returns `(frequencies, coherence)`; both empty when the series are too
/// short to segment.
pub fn pair_spectrum(a: &[f64], b: &[f64], spectral: &SpectralConfig) -> (Vec<f64>, Vec<f64>) {
    let n = a.len().min(b.len());
    let Some(params) = WelchParams::for_length(
        n,
        spectral.max_segment_len,
        spectral.segment_divisor,
        spectral.overlap_fraction,
    ) else {
        return (Vec::new(), Vec::new());
    };
    let (a, b) = (&a[..n], &b[..n]);
    let spec = match spectral.method {
        SpectralMethod::Welch => coherence(a, b, params, 1.0),
        SpectralMethod::Multitaper => {
            let spec = multitaper_coherence(
                a,
                b,
                params,
                spectral.multitaper_bandwidth,
                spectral.multitaper_tapers,
                1.0,
            );
            if spec.coherence.is_empty() {
                debug!(
                    "segment of {} samples too short for NW = {}, using Welch",
                    params.segment_len, spectral.multitaper_bandwidth
                );
                coherence(a, b, params, 1.0)
            } else {
                spec
            }
        }
    };
    (spec.frequencies, spec.coherence)
}

/// Peak coherence for every stream pair and the median across pairs.
///
/// Fewer than two streams yields a zero median and no pairs.
pub fn estimate_coherence(
    whitened: &WhitenedSet,
    spectral: &SpectralConfig,
    coherence_threshold: f64,
    keep_spectra: bool,
) -> CoherenceReport {
    if whitened.len() < 2 {
        warn!(
            "coherence needs at least 2 streams, have {}",
            whitened.len()
        );
        return CoherenceReport::default();
    }

    let streams: Vec<(&String, &[f64])> = whitened
        .iter()
        .map(|(k, w)| (k, w.values.as_slice()))
        .collect();

    let mut pairs = Vec::new();
    for (i, (name_a, a)) in streams.iter().enumerate() {
        for (name_b, b) in &streams[i + 1..] {
            let (frequencies, coh) = pair_spectrum(a, b, spectral);
            let (peak_frequency, peak_coherence) = coh
                .iter()
                .enumerate()
                .fold(None::<(usize, f64)>, |best, (k, &c)| match best {
                    Some((_, bc)) if bc >= c => best,
                    _ => Some((k, c)),
                })
                .map_or((0.0, 0.0), |(k, c)| (frequencies[k], c));

            pairs.push(PairCoherence {
                pair: format!("{name_a}_{name_b}"),
                peak_coherence,
                peak_frequency,
                coherent: peak_coherence >= coherence_threshold,
                spectrum: keep_spectra.then(|| PairSpectrum {
                    frequencies,
                    coherence: coh,
                }),
            });
        }
    }

    let peaks: Vec<f64> = pairs.iter().map(|p| p.peak_coherence).collect();
    CoherenceReport {
        median_coherence: median(&peaks),
        pairs,
    }
}
