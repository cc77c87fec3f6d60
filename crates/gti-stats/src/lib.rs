//! Numeric building blocks for timing-residual analysis.
//!
//! Descriptive statistics, robust noise and outlier estimates, least-squares
//! line fits, Welch and multitaper cross-spectra with magnitude-squared
//! coherence, FFT-based analytic signals, phase unwrapping, principal
//! component analysis, and Kendall rank correlation. Everything here operates
//! on plain `f64` slices and knows nothing about clocks or streams.
//!
//! Empty or degenerate inputs never panic: scalar helpers return `0.0`, and
//! functions with no meaningful answer return `None`.

use nalgebra::{DMatrix, SymmetricEigen};
use rustfft::{FftPlanner, num_complex::Complex};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;

// ═══════════════════════════════════════════════════════════════════════════════
// Descriptive statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Arithmetic mean. Returns 0.0 for empty input.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population variance (divides by `n`). Returns 0.0 for empty input.
pub fn variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / data.len() as f64
}

/// Sample variance (divides by `n - 1`). Returns 0.0 for fewer than 2 values.
pub fn sample_variance(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Population standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    variance(data).sqrt()
}

/// Copy and sort ascending (NaN-safe total order).
pub fn sorted(data: &[f64]) -> Vec<f64> {
    let mut v = data.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

/// Percentile of already-sorted data with linear interpolation between
/// closest ranks (`p` in 0..=100).
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Percentile with linear interpolation. Returns 0.0 for empty input.
pub fn percentile(data: &[f64], p: f64) -> f64 {
    percentile_sorted(&sorted(data), p)
}

/// Median. Returns 0.0 for empty input.
pub fn median(data: &[f64]) -> f64 {
    percentile(data, 50.0)
}

/// Interquartile range (75th minus 25th percentile).
pub fn iqr(data: &[f64]) -> f64 {
    let s = sorted(data);
    percentile_sorted(&s, 75.0) - percentile_sorted(&s, 25.0)
}

/// Median and median absolute deviation `(median, median(|x - median|))`.
pub fn median_abs_deviation(data: &[f64]) -> (f64, f64) {
    let m = median(data);
    let deviations: Vec<f64> = data.iter().map(|&x| (x - m).abs()).collect();
    (m, median(&deviations))
}

/// Element-wise median across equally long series.
///
/// Returns an empty vector when `series` is empty. Series longer than the
/// first one are truncated to its length.
pub fn elementwise_median(series: &[&[f64]]) -> Vec<f64> {
    let Some(first) = series.first() else {
        return Vec::new();
    };
    let len = series.iter().map(|s| s.len()).min().unwrap_or(first.len());
    let mut column = Vec::with_capacity(series.len());
    (0..len)
        .map(|i| {
            column.clear();
            column.extend(series.iter().map(|s| s[i]));
            median(&column)
        })
        .collect()
}

/// Ratio between the MAD and the standard deviation of a normal distribution.
pub const MAD_NORMAL_SCALE: f64 = 0.6745;

/// Robust noise estimate of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseLevel {
    /// Noise standard deviation from the MAD of first differences.
    pub noise_std: f64,
    /// `std_dev(data) / noise_std`; `None` when the noise estimate is zero.
    pub snr: Option<f64>,
}

/// Noise level from the median absolute deviation of first differences.
///
/// Differencing suppresses slow signal content so the MAD tracks the
/// sample-to-sample scatter. Fewer than two samples give zero noise and no
/// SNR.
pub fn estimate_noise_level(data: &[f64]) -> NoiseLevel {
    let diffs: Vec<f64> = data.windows(2).map(|w| w[1] - w[0]).collect();
    let (_, mad) = median_abs_deviation(&diffs);
    let noise_std = mad / MAD_NORMAL_SCALE;
    let snr = (noise_std > 0.0 && noise_std.is_finite()).then(|| std_dev(data) / noise_std);
    NoiseLevel { noise_std, snr }
}

/// Flags samples whose modified z-score `0.6745 (x - median) / MAD` exceeds
/// `threshold` in magnitude.
///
/// A zero MAD flags nothing.
pub fn detect_outliers(data: &[f64], threshold: f64) -> Vec<bool> {
    let (med, mad) = median_abs_deviation(data);
    if mad <= 0.0 || !mad.is_finite() {
        return vec![false; data.len()];
    }
    data.iter()
        .map(|&x| (MAD_NORMAL_SCALE * (x - med) / mad).abs() > threshold)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Regression
// ═══════════════════════════════════════════════════════════════════════════════

/// First-degree least-squares fit `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Ordinary least-squares line through `(x, y)`.
///
/// Returns `None` with fewer than two points, mismatched lengths, or when all
/// `x` are identical.
pub fn fit_line(x: &[f64], y: &[f64]) -> Option<LineFit> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }
    let mx = mean(x);
    let my = mean(y);
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - mx;
        sxx += dx * dx;
        sxy += dx * (yi - my);
    }
    if sxx <= 0.0 || !sxx.is_finite() {
        return None;
    }
    let slope = sxy / sxx;
    Some(LineFit {
        slope,
        intercept: my - slope * mx,
    })
}

/// Least-squares line against sample index `0..n`.
pub fn fit_line_indexed(y: &[f64]) -> Option<LineFit> {
    let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
    fit_line(&x, y)
}

/// Remove the least-squares line (against sample index) from `y`.
///
/// Series shorter than two samples are only mean-centered.
pub fn detrend_linear(y: &[f64]) -> Vec<f64> {
    match fit_line_indexed(y) {
        Some(fit) => y
            .iter()
            .enumerate()
            .map(|(i, &v)| v - fit.predict(i as f64))
            .collect(),
        None => {
            let m = mean(y);
            y.iter().map(|&v| v - m).collect()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Spectral estimation (Welch)
// ═══════════════════════════════════════════════════════════════════════════════

/// Segmentation parameters for Welch averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WelchParams {
    pub segment_len: usize,
    pub overlap: usize,
}

impl WelchParams {
    /// Segment length `min(max_segment_len, n / divisor)` with fractional
    /// overlap, never longer than the series and never shorter than 2.
    ///
    /// Returns `None` when the series is too short to form one segment.
    pub fn for_length(
        n: usize,
        max_segment_len: usize,
        divisor: usize,
        overlap_fraction: f64,
    ) -> Option<Self> {
        if n < 2 {
            return None;
        }
        let segment_len = max_segment_len.min(n / divisor.max(1)).clamp(2, n);
        let overlap = ((segment_len as f64) * overlap_fraction.clamp(0.0, 0.99)).floor() as usize;
        Some(Self {
            segment_len,
            overlap: overlap.min(segment_len - 1),
        })
    }

    fn step(&self) -> usize {
        self.segment_len - self.overlap
    }

    /// Number of full segments that fit into `n` samples.
    pub fn segment_count(&self, n: usize) -> usize {
        if n < self.segment_len {
            return 0;
        }
        (n - self.segment_len) / self.step() + 1
    }
}

/// Periodic Hann window (the DFT-even form used for spectral averaging).
pub fn hann_window(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// One-sided Welch auto- and cross-spectral densities of two series.
#[derive(Debug, Clone)]
pub struct CrossSpectrum {
    pub frequencies: Vec<f64>,
    pub pxx: Vec<f64>,
    pub pyy: Vec<f64>,
    pub pxy: Vec<Complex<f64>>,
    pub segments: usize,
}

/// Welch estimate of `Pxx`, `Pyy` and `Pxy = E[conj(X) Y]`.
///
/// Each segment is mean-removed and Hann-windowed before the FFT. Both series
/// are truncated to the shorter length. Returns `None` when no full segment
/// fits.
pub fn welch_cross_spectrum(
    x: &[f64],
    y: &[f64],
    params: WelchParams,
    sample_rate: f64,
) -> Option<CrossSpectrum> {
    if params.segment_len < 2 {
        return None;
    }
    tapered_cross_spectrum(x, y, params, &[hann_window(params.segment_len)], sample_rate)
}

/// Segment-averaged cross-spectrum with one or more data tapers.
///
/// Every segment is transformed once per taper; the eigenspectra are scaled
/// by the taper's energy and averaged over tapers and segments.
fn tapered_cross_spectrum(
    x: &[f64],
    y: &[f64],
    params: WelchParams,
    tapers: &[Vec<f64>],
    sample_rate: f64,
) -> Option<CrossSpectrum> {
    let n = x.len().min(y.len());
    let nseg = params.segment_len;
    let segments = params.segment_count(n);
    if segments == 0 || tapers.is_empty() || tapers.iter().any(|t| t.len() != nseg) {
        return None;
    }

    let n_freq = nseg / 2 + 1;
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nseg);

    let mut pxx = vec![0.0; n_freq];
    let mut pyy = vec![0.0; n_freq];
    let mut pxy = vec![Complex::new(0.0, 0.0); n_freq];
    let mut bx = vec![Complex::new(0.0, 0.0); nseg];
    let mut by = vec![Complex::new(0.0, 0.0); nseg];

    for s in 0..segments {
        let start = s * params.step();
        let seg_x = &x[start..start + nseg];
        let seg_y = &y[start..start + nseg];
        let mx = mean(seg_x);
        let my = mean(seg_y);
        for taper in tapers {
            let energy: f64 = taper.iter().map(|w| w * w).sum();
            if energy <= 0.0 {
                return None;
            }
            for i in 0..nseg {
                bx[i] = Complex::new((seg_x[i] - mx) * taper[i], 0.0);
                by[i] = Complex::new((seg_y[i] - my) * taper[i], 0.0);
            }
            fft.process(&mut bx);
            fft.process(&mut by);
            for k in 0..n_freq {
                pxx[k] += bx[k].norm_sqr() / energy;
                pyy[k] += by[k].norm_sqr() / energy;
                pxy[k] += bx[k].conj() * by[k] / energy;
            }
        }
    }

    let norm = 1.0 / (sample_rate * (segments * tapers.len()) as f64);
    for k in 0..n_freq {
        // One-sided: double everything except DC and (for even lengths) Nyquist.
        let one_sided = if k == 0 || (nseg % 2 == 0 && k == nseg / 2) {
            1.0
        } else {
            2.0
        };
        pxx[k] *= norm * one_sided;
        pyy[k] *= norm * one_sided;
        pxy[k] *= norm * one_sided;
    }

    let frequencies = (0..n_freq)
        .map(|k| k as f64 * sample_rate / nseg as f64)
        .collect();

    Some(CrossSpectrum {
        frequencies,
        pxx,
        pyy,
        pxy,
        segments,
    })
}

/// Magnitude-squared coherence spectrum.
#[derive(Debug, Clone, Default)]
pub struct CoherenceSpectrum {
    pub frequencies: Vec<f64>,
    pub coherence: Vec<f64>,
}

impl CoherenceSpectrum {
    /// `(frequency, coherence)` at the first maximum.
    pub fn peak(&self) -> Option<(f64, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &c) in self.coherence.iter().enumerate() {
            if best.is_none_or(|(_, b)| c > b) {
                best = Some((i, c));
            }
        }
        best.map(|(i, c)| (self.frequencies[i], c))
    }
}

/// Magnitude-squared coherence `|Pxy|² / (Pxx · Pyy)` via Welch averaging.
///
/// Bins where either auto-spectrum vanishes are reported as zero coherence.
/// Values are clamped into [0, 1].
pub fn coherence(x: &[f64], y: &[f64], params: WelchParams, sample_rate: f64) -> CoherenceSpectrum {
    welch_cross_spectrum(x, y, params, sample_rate)
        .map(coherence_from_cross)
        .unwrap_or_default()
}

fn coherence_from_cross(spec: CrossSpectrum) -> CoherenceSpectrum {
    let coherence = spec
        .pxy
        .iter()
        .zip(spec.pxx.iter().zip(&spec.pyy))
        .map(|(cross, (&a, &b))| {
            let denom = a * b;
            if denom > 0.0 && denom.is_finite() {
                (cross.norm_sqr() / denom).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect();
    CoherenceSpectrum {
        frequencies: spec.frequencies,
        coherence,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Spectral estimation (multitaper)
// ═══════════════════════════════════════════════════════════════════════════════

/// Default time-bandwidth product for multitaper estimates.
pub const DEFAULT_TIME_BANDWIDTH: f64 = 4.0;
/// Default number of Slepian tapers (`2 NW - 1`).
pub const DEFAULT_TAPERS: usize = 7;

/// First `k` discrete prolate spheroidal (Slepian) sequences of length `n`
/// with time-bandwidth product `nw`, most concentrated first.
///
/// The tapers are the leading eigenvectors of the symmetric tridiagonal
/// matrix that commutes with the spectral concentration operator. Each taper
/// has unit energy; even-order tapers have a positive sum and odd-order
/// tapers a positive first lobe.
///
/// Returns `None` unless `0 < 2 nw < n` and `1 <= k <= n`. The dense
/// eigen-solve is cubic in `n`, so callers segment long records.
pub fn dpss_tapers(n: usize, nw: f64, k: usize) -> Option<Vec<Vec<f64>>> {
    if n < 2 || k == 0 || k > n || !nw.is_finite() || nw <= 0.0 || 2.0 * nw >= n as f64 {
        return None;
    }
    let w = nw / n as f64;
    let cos_w = (2.0 * PI * w).cos();
    let tridiagonal = DMatrix::<f64>::from_fn(n, n, |i, j| {
        if i == j {
            let t = (n as f64 - 1.0 - 2.0 * i as f64) / 2.0;
            t * t * cos_w
        } else if i + 1 == j {
            (j * (n - j)) as f64 / 2.0
        } else if j + 1 == i {
            (i * (n - i)) as f64 / 2.0
        } else {
            0.0
        }
    });

    let eigen = SymmetricEigen::new(tridiagonal);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let threshold = (1.0 / n as f64).max(1e-7);
    let tapers = order
        .iter()
        .take(k)
        .enumerate()
        .map(|(rank, &col)| {
            let mut taper: Vec<f64> = eigen.eigenvectors.column(col).iter().copied().collect();
            let norm = taper.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                taper.iter_mut().for_each(|v| *v /= norm);
            }
            let flip = if rank % 2 == 0 {
                taper.iter().sum::<f64>() < 0.0
            } else {
                taper
                    .iter()
                    .find(|v| *v * *v > threshold)
                    .is_some_and(|&v| v < 0.0)
            };
            if flip {
                taper.iter_mut().for_each(|v| *v = -*v);
            }
            taper
        })
        .collect();
    Some(tapers)
}

/// Segment-averaged multitaper estimate of `Pxx`, `Pyy` and `Pxy`.
///
/// Segmentation follows `params`; each segment is mean-removed and tapered by
/// the first `k` Slepian sequences of time-bandwidth `nw`. Returns `None` when
/// no full segment fits or the segment is too short for the requested
/// bandwidth.
pub fn multitaper_cross_spectrum(
    x: &[f64],
    y: &[f64],
    params: WelchParams,
    nw: f64,
    k: usize,
    sample_rate: f64,
) -> Option<CrossSpectrum> {
    if params.segment_count(x.len().min(y.len())) == 0 {
        return None;
    }
    let tapers = dpss_tapers(params.segment_len, nw, k)?;
    tapered_cross_spectrum(x, y, params, &tapers, sample_rate)
}

/// Magnitude-squared coherence from a multitaper cross-spectrum.
///
/// Same conventions as [`coherence`]; an empty spectrum when the multitaper
/// estimate is unavailable.
pub fn multitaper_coherence(
    x: &[f64],
    y: &[f64],
    params: WelchParams,
    nw: f64,
    k: usize,
    sample_rate: f64,
) -> CoherenceSpectrum {
    multitaper_cross_spectrum(x, y, params, nw, k, sample_rate)
        .map(coherence_from_cross)
        .unwrap_or_default()
}

/// One-sided power spectral density.
#[derive(Debug, Clone, Default)]
pub struct PowerSpectrum {
    pub frequencies: Vec<f64>,
    pub psd: Vec<f64>,
}

/// Whole-record multitaper PSD of `x` at frequencies `0..=n/2` bins.
pub fn multitaper_psd(x: &[f64], nw: f64, k: usize, sample_rate: f64) -> Option<PowerSpectrum> {
    if x.len() < 2 {
        return None;
    }
    let params = WelchParams {
        segment_len: x.len(),
        overlap: 0,
    };
    let spec = multitaper_cross_spectrum(x, x, params, nw, k, sample_rate)?;
    Some(PowerSpectrum {
        frequencies: spec.frequencies,
        psd: spec.pxx,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Analytic signal and phase
// ═══════════════════════════════════════════════════════════════════════════════

/// Analytic signal via the FFT Hilbert transform.
///
/// The real part reproduces the input; the imaginary part is its Hilbert
/// transform.
pub fn analytic_signal(signal: &[f64]) -> Vec<Complex<f64>> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
    forward.process(&mut buffer);

    // h[0] = 1, h[1..(n+1)/2] = 2, h[n/2] = 1 for even n, rest 0.
    let positive_end = n.div_ceil(2);
    for c in buffer.iter_mut().take(positive_end).skip(1) {
        *c *= 2.0;
    }
    let negative_start = if n % 2 == 0 { n / 2 + 1 } else { positive_end };
    for c in buffer.iter_mut().skip(negative_start) {
        *c = Complex::new(0.0, 0.0);
    }

    inverse.process(&mut buffer);
    let inv_n = 1.0 / n as f64;
    for c in buffer.iter_mut() {
        *c *= inv_n;
    }
    buffer
}

/// Instantaneous phase (radians, in (-π, π]) of the analytic signal.
pub fn instantaneous_phase(signal: &[f64]) -> Vec<f64> {
    analytic_signal(signal).iter().map(|c| c.arg()).collect()
}

/// Unwrap a phase track by removing 2π jumps between consecutive samples.
///
/// Differences larger than π in magnitude are replaced by their 2π-congruent
/// value in [-π, π); an exact +π step is kept as +π.
pub fn unwrap_phase(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let Some(&first) = phase.first() else {
        return out;
    };
    out.push(first);
    let mut correction = 0.0;
    for w in phase.windows(2) {
        let dd = w[1] - w[0];
        let mut ddmod = (dd + PI).rem_euclid(2.0 * PI) - PI;
        if ddmod == -PI && dd > 0.0 {
            ddmod = PI;
        }
        if dd.abs() >= PI {
            correction += ddmod - dd;
        }
        out.push(w[1] + correction);
    }
    out
}

/// Wrap an angle in degrees into (-180, 180].
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Principal component analysis
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a mean-centered, unscaled PCA.
#[derive(Debug, Clone)]
pub struct Pca {
    /// Loading vectors, one per component, ordered by decreasing variance.
    pub components: Vec<Vec<f64>>,
    /// Variance captured by each component (sample covariance, `n - 1`).
    pub explained_variance: Vec<f64>,
    /// Fraction of total variance per component; sums to 1 unless the total
    /// variance is zero, in which case every ratio is 0.
    pub explained_variance_ratio: Vec<f64>,
    /// Projected scores, `scores[k][i]` for component `k` and sample `i`.
    pub scores: Vec<Vec<f64>>,
}

/// PCA over `columns` (one column per variable, all of equal length).
///
/// Each loading vector is sign-normalised so that its largest-magnitude
/// entry is positive. Returns `None` for no columns, fewer than two rows, or
/// ragged columns.
pub fn pca(columns: &[Vec<f64>]) -> Option<Pca> {
    let p = columns.len();
    let n = columns.first()?.len();
    if p == 0 || n < 2 || columns.iter().any(|c| c.len() != n) {
        return None;
    }

    let centered: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| {
            let m = mean(c);
            c.iter().map(|&x| x - m).collect()
        })
        .collect();

    let data = DMatrix::<f64>::from_fn(n, p, |i, j| centered[j][i]);
    let cov = (data.transpose() * &data) / (n - 1) as f64;
    let eigen = SymmetricEigen::new(cov);

    let mut order: Vec<usize> = (0..p).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let explained_variance: Vec<f64> = order
        .iter()
        .map(|&k| eigen.eigenvalues[k].max(0.0))
        .collect();
    let total: f64 = explained_variance.iter().sum();
    let explained_variance_ratio = explained_variance
        .iter()
        .map(|&v| if total > 0.0 { v / total } else { 0.0 })
        .collect();

    let components: Vec<Vec<f64>> = order
        .iter()
        .map(|&k| {
            let mut loading: Vec<f64> = eigen.eigenvectors.column(k).iter().copied().collect();
            let pivot = loading
                .iter()
                .copied()
                .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            if pivot < 0.0 {
                loading.iter_mut().for_each(|x| *x = -*x);
            }
            loading
        })
        .collect();

    let scores = components
        .iter()
        .map(|loading| {
            (0..n)
                .map(|i| (0..p).map(|j| centered[j][i] * loading[j]).sum())
                .collect()
        })
        .collect();

    Some(Pca {
        components,
        explained_variance,
        explained_variance_ratio,
        scores,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rank correlation and intervals
// ═══════════════════════════════════════════════════════════════════════════════

/// Kendall's tau-b with a two-sided normal-approximation p-value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KendallTau {
    pub tau: f64,
    pub p_value: f64,
}

/// Sizes of runs of equal values in sorted data.
fn tie_groups(data: &[f64]) -> Vec<f64> {
    let s = sorted(data);
    let mut groups = Vec::new();
    let mut run = 1usize;
    for i in 1..s.len() {
        if s[i] == s[i - 1] {
            run += 1;
        } else {
            if run > 1 {
                groups.push(run as f64);
            }
            run = 1;
        }
    }
    if run > 1 {
        groups.push(run as f64);
    }
    groups
}

/// Kendall's tau-b between `x` and `y`.
///
/// Returns `None` with fewer than two pairs, mismatched lengths, or when
/// either series is entirely tied (tau undefined).
pub fn kendall_tau(x: &[f64], y: &[f64]) -> Option<KendallTau> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }

    let mut concordant = 0i64;
    let mut discordant = 0i64;
    let mut ties_x = 0i64;
    let mut ties_y = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[j] - x[i];
            let dy = y[j] - y[i];
            if dx == 0.0 && dy == 0.0 {
                ties_x += 1;
                ties_y += 1;
            } else if dx == 0.0 {
                ties_x += 1;
            } else if dy == 0.0 {
                ties_y += 1;
            } else if (dx > 0.0) == (dy > 0.0) {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
    }

    let n0 = (n * (n - 1) / 2) as f64;
    let denom = ((n0 - ties_x as f64) * (n0 - ties_y as f64)).sqrt();
    if denom <= 0.0 {
        return None;
    }
    let s = (concordant - discordant) as f64;
    let tau = (s / denom).clamp(-1.0, 1.0);

    let nf = n as f64;
    let tx = tie_groups(x);
    let ty = tie_groups(y);
    let sum = |g: &[f64], f: &dyn Fn(f64) -> f64| g.iter().map(|&t| f(t)).sum::<f64>();
    let v0 = nf * (nf - 1.0) * (2.0 * nf + 5.0);
    let vt = sum(&tx, &|t| t * (t - 1.0) * (2.0 * t + 5.0));
    let vu = sum(&ty, &|t| t * (t - 1.0) * (2.0 * t + 5.0));
    let v1 = sum(&tx, &|t| t * (t - 1.0)) * sum(&ty, &|t| t * (t - 1.0)) / (2.0 * nf * (nf - 1.0));
    let v2 = if n > 2 {
        sum(&tx, &|t| t * (t - 1.0) * (t - 2.0)) * sum(&ty, &|t| t * (t - 1.0) * (t - 2.0))
            / (9.0 * nf * (nf - 1.0) * (nf - 2.0))
    } else {
        0.0
    };
    let var_s = (v0 - vt - vu) / 18.0 + v1 + v2;

    let p_value = if var_s > 0.0 {
        let z = s / var_s.sqrt();
        let normal = Normal::new(0.0, 1.0).ok()?;
        (2.0 * normal.sf(z.abs())).clamp(0.0, 1.0)
    } else {
        1.0
    };

    Some(KendallTau { tau, p_value })
}

/// Central interval summary of a sample distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CredibleInterval {
    pub lower: f64,
    pub upper: f64,
    pub median: f64,
    pub mean: f64,
}

/// Equal-tailed interval covering `confidence` (e.g. 0.95) of `samples`.
pub fn credible_interval(samples: &[f64], confidence: f64) -> Option<CredibleInterval> {
    if samples.is_empty() || !(0.0..=1.0).contains(&confidence) {
        return None;
    }
    let s = sorted(samples);
    let alpha = 1.0 - confidence;
    Some(CredibleInterval {
        lower: percentile_sorted(&s, 100.0 * alpha / 2.0),
        upper: percentile_sorted(&s, 100.0 * (1.0 - alpha / 2.0)),
        median: percentile_sorted(&s, 50.0),
        mean: mean(samples),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
