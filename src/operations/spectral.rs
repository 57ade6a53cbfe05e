//! Spectral building blocks shared by the feature extractors.
//!
//! Everything here works on `f64` internally; blocks are converted to `f32`
//! only when a representation is finished.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array2, s};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::types::WindowType;
use crate::{FeatureError, FeatureResult};

/// Smallest amplitude considered when converting magnitudes to dB.
pub const AMPLITUDE_FLOOR: f64 = 1e-5;
/// Smallest power considered when converting powers to dB.
pub const POWER_FLOOR: f64 = 1e-10;

/// Frequency of C0 in Hz (A4 = 440 Hz tuning).
const C0_HZ: f64 = 16.351_597_831_287_414;

/// Planned short-time Fourier transform with a fixed window.
///
/// Frames are centered: the signal is zero-padded by `n_fft / 2` on both
/// sides, so a clip of `n` samples yields `1 + n / hop` frames regardless of
/// whether it is shorter than the window.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("n_fft", &self.n_fft)
            .field("hop", &self.hop)
            .finish()
    }
}

impl Stft {
    /// Plans a transform of size `n_fft` advancing `hop` samples per frame.
    pub fn new(n_fft: usize, hop: usize, window_type: WindowType) -> FeatureResult<Self> {
        if n_fft < 2 || hop == 0 {
            return Err(FeatureError::InvalidParameter(
                "Window size must be at least 2 and hop size greater than 0".to_string(),
            ));
        }
        if hop > n_fft {
            return Err(FeatureError::InvalidParameter(
                "Hop size cannot be larger than window size".to_string(),
            ));
        }
        let mut planner = FftPlanner::new();
        Ok(Self {
            n_fft,
            hop,
            window: generate_window(n_fft, window_type),
            fft: planner.plan_fft_forward(n_fft),
        })
    }

    /// Number of non-negative frequency bins.
    pub const fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for `len` samples.
    pub const fn frames(&self, len: usize) -> usize {
        1 + len / self.hop
    }

    /// Complex spectrum, `(n_fft / 2 + 1, frames)`.
    pub fn process(&self, samples: &[f32]) -> FeatureResult<Array2<Complex<f64>>> {
        if samples.is_empty() {
            return Err(FeatureError::InvalidParameter(
                "Cannot transform an empty signal".to_string(),
            ));
        }

        let pad = self.n_fft / 2;
        let mut padded = vec![0.0f64; samples.len() + 2 * pad];
        for (dst, &src) in padded[pad..pad + samples.len()].iter_mut().zip(samples) {
            *dst = if src.is_finite() { src as f64 } else { 0.0 };
        }

        let num_frames = self.frames(samples.len());
        let bins = self.bins();
        let mut matrix = Array2::zeros((bins, num_frames));
        let mut buffer = vec![Complex::new(0.0, 0.0); self.n_fft];

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for (freq_idx, value) in buffer.iter().take(bins).enumerate() {
                matrix[[freq_idx, frame_idx]] = *value;
            }
        }

        Ok(matrix)
    }

    /// Magnitude spectrum `|X|`.
    pub fn magnitude(&self, samples: &[f32]) -> FeatureResult<Array2<f64>> {
        Ok(self.process(samples)?.mapv(|c| c.norm()))
    }
}

/// Generate window function coefficients (periodic form).
pub fn generate_window(size: usize, window_type: WindowType) -> Vec<f64> {
    match window_type {
        WindowType::Rectangular => vec![1.0; size],
        WindowType::Hanning => (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
            .collect(),
        WindowType::Hamming => (0..size)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / size as f64).cos())
            .collect(),
    }
}

/// Converts a magnitude spectrogram to dB, clamped to `top_db` below its peak.
pub fn amplitude_to_db(magnitude: &Array2<f64>, top_db: f64) -> Array2<f64> {
    to_db(magnitude, 20.0, AMPLITUDE_FLOOR, Some(top_db))
}

/// Converts a power spectrogram to dB, clamped to `top_db` below its peak.
pub fn power_to_db(power: &Array2<f64>, top_db: Option<f64>) -> Array2<f64> {
    to_db(power, 10.0, POWER_FLOOR, top_db)
}

fn to_db(values: &Array2<f64>, factor: f64, floor: f64, top_db: Option<f64>) -> Array2<f64> {
    let mut db = values.mapv(|x| factor * x.max(floor).log10());
    if let Some(top_db) = top_db {
        let peak = db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if peak.is_finite() {
            let threshold = peak - top_db;
            db.mapv_inplace(|x| x.max(threshold));
        }
    }
    db
}

/// Converts frequency in Hz to the mel scale (`2595 * log10(1 + f / 700)`).
pub fn hz_to_mel(freq_hz: f64) -> f64 {
    2595.0 * (1.0 + freq_hz / 700.0).log10()
}

/// Converts a mel value back to Hz.
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Centre frequencies of the non-negative FFT bins.
pub fn fft_frequencies(n_fft: usize, sample_rate: f64) -> Vec<f64> {
    (0..n_fft / 2 + 1)
        .map(|i| i as f64 * sample_rate / n_fft as f64)
        .collect()
}

/// Generates a mel filter bank of triangular filters, `(n_filters, n_fft / 2 + 1)`.
///
/// Each filter rises linearly from the previous centre to its own and falls to
/// the next one, and is normalized to unit area.
pub fn mel_filter_bank(
    n_filters: usize,
    n_fft: usize,
    sample_rate: f64,
    fmin: f64,
    fmax: f64,
) -> Array2<f64> {
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let mel_step = (mel_max - mel_min) / (n_filters + 1) as f64;
    let edges: Vec<f64> = (0..n_filters + 2)
        .map(|i| mel_to_hz(mel_min + i as f64 * mel_step))
        .collect();

    let freq_bins = fft_frequencies(n_fft, sample_rate);
    let mut filter_bank = Array2::zeros((n_filters, freq_bins.len()));

    for filter_idx in 0..n_filters {
        let f_left = edges[filter_idx];
        let f_center = edges[filter_idx + 1];
        let f_right = edges[filter_idx + 2];

        for (bin_idx, &freq) in freq_bins.iter().enumerate() {
            let filter_val = if freq < f_left || freq > f_right {
                0.0
            } else if freq <= f_center {
                if f_center == f_left {
                    1.0
                } else {
                    (freq - f_left) / (f_center - f_left)
                }
            } else if f_right == f_center {
                0.0
            } else {
                (f_right - freq) / (f_right - f_center)
            };
            filter_bank[[filter_idx, bin_idx]] = filter_val;
        }

        let filter_sum: f64 = filter_bank.row(filter_idx).sum();
        if filter_sum > 0.0 {
            filter_bank
                .row_mut(filter_idx)
                .mapv_inplace(|x| x / filter_sum);
        }
    }

    filter_bank
}

/// Orthonormal DCT-II of every column of `input`, keeping the first `n_out` coefficients.
///
/// `X[k] = s(k) * Σ x[n] * cos(π * k * (2n + 1) / (2N))` with
/// `s(0) = sqrt(1/N)` and `s(k) = sqrt(2/N)` otherwise.
pub fn dct_type2(input: &Array2<f64>, n_out: usize) -> Array2<f64> {
    let (n_input, frames) = input.dim();
    let mut basis = Array2::zeros((n_out, n_input));
    for k in 0..n_out {
        let norm_factor = if k == 0 {
            (1.0 / n_input as f64).sqrt()
        } else {
            (2.0 / n_input as f64).sqrt()
        };
        for n in 0..n_input {
            basis[[k, n]] =
                norm_factor * (PI * k as f64 * (2.0 * n as f64 + 1.0) / (2.0 * n_input as f64)).cos();
        }
    }
    if frames == 0 {
        return Array2::zeros((n_out, 0));
    }
    basis.dot(input)
}

/// Maps FFT bins to `n_chroma` pitch-class bins, `(n_chroma, n_fft / 2 + 1)`.
///
/// Each bin's energy is split linearly between the two nearest chroma bins.
/// The DC bin and bins below C0 carry no pitch and are left out.
pub fn chroma_filter_bank(n_chroma: usize, n_fft: usize, sample_rate: f64) -> Array2<f64> {
    let freqs = fft_frequencies(n_fft, sample_rate);
    let mut bank = Array2::zeros((n_chroma, freqs.len()));
    for (bin, &freq) in freqs.iter().enumerate() {
        if freq < C0_HZ {
            continue;
        }
        let position = (n_chroma as f64 * (freq / C0_HZ).log2()).rem_euclid(n_chroma as f64);
        let lower = position.floor();
        let frac = position - lower;
        let lo = lower as usize % n_chroma;
        let hi = (lo + 1) % n_chroma;
        bank[[lo, bin]] += 1.0 - frac;
        bank[[hi, bin]] += frac;
    }
    bank
}

/// Harmonic part of a magnitude spectrogram.
///
/// Median filtering along time enhances sustained partials, along frequency it
/// enhances transients; a Wiener-style soft mask (power 2) keeps the share of
/// each bin that belongs to the harmonic estimate.
pub fn harmonic_magnitude(
    magnitude: &Array2<f64>,
    harmonic_kernel: usize,
    percussive_kernel: usize,
) -> Array2<f64> {
    let harmonic = median_filter_time_axis(magnitude, harmonic_kernel);
    let percussive = median_filter_freq_axis(magnitude, percussive_kernel);

    let mut out = magnitude.clone();
    ndarray::Zip::from(&mut out)
        .and(&harmonic)
        .and(&percussive)
        .for_each(|m, &h, &p| {
            let h2 = h * h;
            let denom = h2 + p * p;
            *m = if denom > 0.0 { *m * h2 / denom } else { 0.0 };
        });
    out
}

fn median_filter_time_axis(spectrogram: &Array2<f64>, kernel_size: usize) -> Array2<f64> {
    let mut filtered = Array2::zeros(spectrogram.dim());
    for freq_idx in 0..spectrogram.nrows() {
        let row = spectrogram.slice(s![freq_idx, ..]).to_vec();
        let smoothed = median_filter_1d(&row, kernel_size);
        filtered
            .slice_mut(s![freq_idx, ..])
            .iter_mut()
            .zip(smoothed)
            .for_each(|(dst, v)| *dst = v);
    }
    filtered
}

fn median_filter_freq_axis(spectrogram: &Array2<f64>, kernel_size: usize) -> Array2<f64> {
    let mut filtered = Array2::zeros(spectrogram.dim());
    for time_idx in 0..spectrogram.ncols() {
        let col = spectrogram.slice(s![.., time_idx]).to_vec();
        let smoothed = median_filter_1d(&col, kernel_size);
        filtered
            .slice_mut(s![.., time_idx])
            .iter_mut()
            .zip(smoothed)
            .for_each(|(dst, v)| *dst = v);
    }
    filtered
}

/// Sliding median with edge replication at the borders.
fn median_filter_1d(signal: &[f64], kernel_size: usize) -> Vec<f64> {
    if kernel_size <= 1 || signal.is_empty() {
        return signal.to_vec();
    }
    let len = signal.len() as isize;
    let half = (kernel_size / 2) as isize;
    let mut window = Vec::with_capacity(kernel_size);
    (0..len)
        .map(|i| {
            window.clear();
            for j in 0..kernel_size as isize {
                let idx = (i + j - half).clamp(0, len - 1);
                window.push(signal[idx as usize]);
            }
            window.sort_by(|a, b| a.total_cmp(b));
            window[window.len() / 2]
        })
        .collect()
}
