//! Residual preparation, reference construction, and whitening.

use std::collections::BTreeMap;

use gti_stats::{
    detect_outliers, detrend_linear, elementwise_median, estimate_noise_level, mean,
    median_abs_deviation, std_dev,
};
use log::{debug, warn};
use serde::Serialize;

use crate::json::opt_finite_or_null;
use crate::stream::StreamSet;

/// Nominal reference frequency: one cycle per day, in Hz.
pub const REFERENCE_FREQUENCY_HZ: f64 = 1.0 / 86_400.0;

/// Clip half-width in units of MAD.
const CLIP_MADS: f64 = 3.0;

/// Modified z-score above which a residual sample counts as an outlier.
pub const OUTLIER_Z: f64 = 3.0;

/// Detrended residual of one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Residual {
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
    pub raw_values: Vec<f64>,
}

/// Residuals keyed by stream name, in name order.
pub type ResidualSet = BTreeMap<String, Residual>;

/// Expected value of a stream under the timing model. No physical model is
/// applied, so this is identically zero.
fn expected_values(timestamps: &[f64]) -> Vec<f64> {
    vec![0.0; timestamps.len()]
}

/// Detrend every usable stream and subtract its expected values.
///
/// Streams with fewer than `min_samples` samples are skipped with a warning.
/// A stream whose raw values are all equal yields exact zeros.
pub fn prepare_residuals(streams: &StreamSet, min_samples: usize) -> ResidualSet {
    let mut out = ResidualSet::new();
    for (name, samples) in streams.iter() {
        if samples.len() < min_samples {
            warn!(
                "stream {name}: {} sample(s), need {min_samples}; skipped",
                samples.len()
            );
            continue;
        }
        let timestamps: Vec<f64> = samples.iter().map(|s| s.timestamp).collect();
        let raw_values: Vec<f64> = samples.iter().map(|s| s.value).collect();

        let constant = raw_values.windows(2).all(|w| w[0] == w[1]);
        let detrended = if constant {
            vec![0.0; raw_values.len()]
        } else {
            detrend_linear(&raw_values)
        };
        let values = detrended
            .iter()
            .zip(expected_values(&timestamps))
            .map(|(d, e)| d - e)
            .collect();

        out.insert(
            name.to_string(),
            Residual {
                timestamps,
                values,
                raw_values,
            },
        );
    }
    out
}

/// Cross-stream reference signal used as the phase baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub timestamps: Vec<f64>,
    pub signal: Vec<f64>,
    pub frequency: f64,
}

/// Element-wise median of every stream whose length matches the first
/// stream's. The first stream always matches itself, so the reference is
/// all-zero only when there are no residuals at all.
pub fn build_reference(residuals: &ResidualSet) -> Reference {
    let Some(base) = residuals.values().next() else {
        return Reference {
            timestamps: Vec::new(),
            signal: Vec::new(),
            frequency: 0.0,
        };
    };
    let n = base.timestamps.len();
    let matching: Vec<&[f64]> = residuals
        .values()
        .filter(|r| r.values.len() == n)
        .map(|r| r.values.as_slice())
        .collect();
    debug!(
        "reference: {} of {} stream(s) share the base length {n}",
        matching.len(),
        residuals.len()
    );
    let signal = if matching.is_empty() {
        vec![0.0; n]
    } else {
        elementwise_median(&matching)
    };
    Reference {
        timestamps: base.timestamps.clone(),
        signal,
        frequency: REFERENCE_FREQUENCY_HZ,
    }
}

/// Whitened residual of one stream, with the input kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Whitened {
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
    pub original_values: Vec<f64>,
}

pub type WhitenedSet = BTreeMap<String, Whitened>;

/// Clip to `median ± 3·MAD`, then z-score.
///
/// Output length and order always match the input. A clipped series with no
/// spread maps to all zeros.
pub fn whiten_values(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let (m, mad) = median_abs_deviation(values);
    let lo = m - CLIP_MADS * mad;
    let hi = m + CLIP_MADS * mad;
    let clipped: Vec<f64> = values.iter().map(|&x| x.clamp(lo, hi)).collect();

    let mu = mean(&clipped);
    let sd = std_dev(&clipped);
    let scale = clipped.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
    if !sd.is_finite() || sd == 0.0 || sd <= 1e-12 * scale {
        return vec![0.0; values.len()];
    }
    clipped.iter().map(|&x| (x - mu) / sd).collect()
}

pub fn whiten(residuals: &ResidualSet) -> WhitenedSet {
    residuals
        .iter()
        .map(|(name, r)| {
            let values = whiten_values(&r.values);
            if values.iter().all(|&v| v == 0.0) {
                debug!("stream {name}: zero spread after clipping; whitened to zeros");
            }
            (
                name.clone(),
                Whitened {
                    timestamps: r.timestamps.clone(),
                    values,
                    original_values: r.values.clone(),
                },
            )
        })
        .collect()
}

/// Robust noise figures of one residual stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamQuality {
    pub noise_std: f64,
    /// `null` when the stream has no sample-to-sample scatter.
    #[serde(serialize_with = "opt_finite_or_null")]
    pub snr: Option<f64>,
    pub outliers: usize,
}

/// Noise level, SNR and outlier count of every residual stream.
pub fn stream_quality(residuals: &ResidualSet) -> BTreeMap<String, StreamQuality> {
    residuals
        .iter()
        .map(|(name, r)| {
            let level = estimate_noise_level(&r.values);
            let outliers = detect_outliers(&r.values, OUTLIER_Z)
                .into_iter()
                .filter(|&flag| flag)
                .count();
            if outliers > 0 {
                debug!("stream {name}: {outliers} outlier(s) beyond |z| = {OUTLIER_Z}");
            }
            (
                name.clone(),
                StreamQuality {
                    noise_std: level.noise_std,
                    snr: level.snr,
                    outliers,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Sample;

    fn stream(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(i as f64 * 60.0, v))
            .collect()
    }

    #[test]
    fn test_short_streams_dropped() {
        let mut set = StreamSet::new();
        set.insert("TAI", stream(&[1.0; 9]));
        set.insert("GNSS", stream(&(0..12).map(|i| i as f64).collect::<Vec<_>>()));
        let r = prepare_residuals(&set, 10);
        assert_eq!(r.len(), 1);
        assert!(r.contains_key("GNSS"));
    }

    #[test]
    fn test_residual_removes_trend() {
        let mut set = StreamSet::new();
        let vals: Vec<f64> = (0..20).map(|i| 5.0 + 0.25 * i as f64).collect();
        set.insert("PTA", stream(&vals));
        let r = prepare_residuals(&set, 10);
        let res = &r["PTA"];
        assert_eq!(res.raw_values, vals);
        assert!(res.values.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_constant_stream_is_exact_zero() {
        let mut set = StreamSet::new();
        set.insert("TAI", stream(&[0.1; 15]));
        let r = prepare_residuals(&set, 10);
        assert!(r["TAI"].values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_reference_empty() {
        let r = build_reference(&ResidualSet::new());
        assert!(r.signal.is_empty());
        assert!(r.timestamps.is_empty());
    }

    #[test]
    fn test_reference_median_of_matching_lengths() {
        let mut set = StreamSet::new();
        set.insert("A", stream(&[0.0, 1.0, 0.0, 3.0, 0.0, 1.0, 0.0, 3.0, 0.0, 1.0]));
        set.insert("B", stream(&[2.0, 0.0, 2.0, 0.0, 2.0, 0.0, 2.0, 0.0, 2.0, 0.0]));
        set.insert("C", stream(&[1.0; 11]));
        let residuals = prepare_residuals(&set, 10);
        let reference = build_reference(&residuals);
        assert_eq!(reference.signal.len(), 10);
        assert_eq!(reference.frequency, REFERENCE_FREQUENCY_HZ);
        // Two matching streams: median is their mean.
        for i in 0..10 {
            let expected = 0.5 * (residuals["A"].values[i] + residuals["B"].values[i]);
            assert!((reference.signal[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_whiten_unit_variance() {
        let values: Vec<f64> = (0..100).map(|i| ((i * 37) % 17) as f64 - 8.0).collect();
        let w = whiten_values(&values);
        assert_eq!(w.len(), values.len());
        assert!(mean(&w).abs() < 1e-9);
        assert!((std_dev(&w) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_whiten_clips_outlier() {
        let mut values: Vec<f64> = (0..50).map(|i| (i % 5) as f64).collect();
        values[10] = 1e6;
        let w = whiten_values(&values);
        let max = w.iter().cloned().fold(f64::MIN, f64::max);
        assert!(max < 5.0);
    }

    #[test]
    fn test_whiten_constant_is_zero_not_nan() {
        let w = whiten_values(&[3.0; 40]);
        assert!(w.iter().all(|&v| v == 0.0));
        assert!(whiten_values(&[]).is_empty());
    }

    #[test]
    fn test_whiten_keeps_originals() {
        let mut set = StreamSet::new();
        set.insert("VLBI", stream(&(0..30).map(|i| ((i * i) % 7) as f64).collect::<Vec<_>>()));
        let residuals = prepare_residuals(&set, 10);
        let w = whiten(&residuals);
        assert_eq!(w["VLBI"].original_values, residuals["VLBI"].values);
        assert_eq!(w["VLBI"].timestamps, residuals["VLBI"].timestamps);
    }

    #[test]
    fn test_stream_quality() {
        let mut set = StreamSet::new();
        let mut noisy: Vec<f64> = (0..200).map(|i| ((i * 37) % 17) as f64 - 8.0).collect();
        noisy[50] = 500.0;
        set.insert("VLBI", stream(&noisy));
        set.insert("TAI", stream(&[0.1; 15]));
        let quality = stream_quality(&prepare_residuals(&set, 10));

        let vlbi = quality["VLBI"];
        assert!(vlbi.noise_std > 0.0);
        assert!(vlbi.snr.is_some());
        assert_eq!(vlbi.outliers, 1);

        // Constant stream: zero noise, no SNR, serialized as null.
        let tai = quality["TAI"];
        assert_eq!(tai.noise_std, 0.0);
        assert_eq!(tai.outliers, 0);
        let json = serde_json::to_value(tai).unwrap();
        assert!(json["snr"].is_null());
    }
}
