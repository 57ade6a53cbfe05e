//! The six feature extractors.
//!
//! A [`FeatureExtractor`] plans the FFT and builds every filter bank once, so
//! a family of clips is processed without re-planning. Extraction is a pure
//! function of the waveform and the configuration.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use super::normalize::{normalize, scrub_logged};
use super::resize::resize;
use super::spectral::{
    POWER_FLOOR, Stft, amplitude_to_db, chroma_filter_bank, dct_type2, fft_frequencies,
    harmonic_magnitude, mel_filter_bank, power_to_db,
};
use super::types::RepresentationType;
use crate::FeatureBlock;
use crate::audio::AudioClip;
use crate::config::ExtractionConfig;
use crate::{FeatureError, FeatureResult};

/// Native row count of the tonal centroid representation.
pub const TONAL_DIMENSIONS: usize = 6;

/// Pitch classes used for the tonal centroid projection.
const TONAL_CHROMA: usize = 12;

/// Planned extractor for all six representation types.
#[derive(Debug)]
pub struct FeatureExtractor {
    config: ExtractionConfig,
    stft: Stft,
    mel_bank: Array2<f64>,
    mfcc_mel_bank: Array2<f64>,
    chroma_bank: Array2<f64>,
    tonal_chroma_bank: Array2<f64>,
    tonal_basis: Array2<f64>,
}

impl FeatureExtractor {
    /// Validates `config` and builds the transforms it describes.
    pub fn new(config: ExtractionConfig) -> FeatureResult<Self> {
        config.validate()?;
        let sr = config.sample_rate as f64;
        let nyquist = sr / 2.0;
        Ok(Self {
            stft: Stft::new(config.n_fft, config.hop_length, config.window)?,
            mel_bank: mel_filter_bank(config.n_mels, config.n_fft, sr, 0.0, nyquist),
            mfcc_mel_bank: mel_filter_bank(config.mfcc_mels, config.n_fft, sr, 0.0, nyquist),
            chroma_bank: chroma_filter_bank(config.n_chroma, config.n_fft, sr),
            tonal_chroma_bank: chroma_filter_bank(TONAL_CHROMA, config.n_fft, sr),
            tonal_basis: tonal_basis(),
            config,
        })
    }

    /// Configuration the extractor was built from.
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Native-resolution block of one representation, before resizing and normalization.
    pub fn extract(&self, samples: &[f32], kind: RepresentationType) -> FeatureResult<FeatureBlock> {
        let magnitude = self.stft.magnitude(samples)?;
        self.compute(&magnitude, kind)
    }

    /// Extraction, resizing and normalization of one representation of a clip.
    pub fn extract_clip(&self, clip: &AudioClip, kind: RepresentationType) -> FeatureResult<FeatureBlock> {
        self.check_rate(clip)?;
        let magnitude = self.clip_magnitude(clip)?;
        self.finish(&magnitude, kind)
    }

    /// All six representations of a clip in canonical order, sharing one STFT.
    pub fn extract_all(&self, clip: &AudioClip) -> FeatureResult<Vec<FeatureBlock>> {
        self.check_rate(clip)?;
        let magnitude = self.clip_magnitude(clip)?;
        RepresentationType::ALL
            .iter()
            .map(|&kind| self.finish(&magnitude, kind))
            .collect()
    }

    /// Shape of a finished block for a clip of `samples` samples.
    pub fn output_shape(&self, kind: RepresentationType, samples: usize) -> (usize, usize) {
        let cols = self
            .config
            .target_frames
            .unwrap_or_else(|| self.config.frames_for(samples));
        (self.config.output_rows(kind), cols)
    }

    fn check_rate(&self, clip: &AudioClip) -> FeatureResult<()> {
        if clip.sample_rate() != self.config.sample_rate {
            return Err(FeatureError::InvalidParameter(format!(
                "clip sample rate {} Hz differs from configured {} Hz",
                clip.sample_rate(),
                self.config.sample_rate
            )));
        }
        Ok(())
    }

    fn clip_magnitude(&self, clip: &AudioClip) -> FeatureResult<Array2<f64>> {
        match clip.samples().as_slice() {
            Some(samples) => self.stft.magnitude(samples),
            None => self.stft.magnitude(&clip.samples().to_vec()),
        }
    }

    fn finish(&self, magnitude: &Array2<f64>, kind: RepresentationType) -> FeatureResult<FeatureBlock> {
        let block = self.compute(magnitude, kind)?;
        let rows = self.config.output_rows(kind);
        let cols = self.config.target_frames.unwrap_or(block.ncols());
        let block = if block.dim() != (rows, cols) {
            resize(&block.view(), (rows, cols), self.config.interpolation)?
        } else {
            block
        };
        debug!(%kind, rows, cols, "extracted block");
        Ok(normalize(&block))
    }

    fn compute(
        &self,
        magnitude: &Array2<f64>,
        kind: RepresentationType,
    ) -> FeatureResult<FeatureBlock> {
        let top_db = self.config.top_db;
        let values = match kind {
            RepresentationType::Stft => amplitude_to_db(magnitude, top_db),
            RepresentationType::LogMel => {
                let mel = self.mel_bank.dot(&power(magnitude));
                power_to_db(&mel, Some(top_db))
            }
            RepresentationType::Mfcc => {
                let mel = self.mfcc_mel_bank.dot(&power(magnitude));
                dct_type2(&power_to_db(&mel, Some(top_db)), self.config.n_mfcc)
            }
            RepresentationType::Chroma => {
                let mut chroma = self.chroma_bank.dot(&power(magnitude));
                normalize_frames_max(&mut chroma);
                chroma
            }
            RepresentationType::SpectralContrast => self.spectral_contrast(magnitude),
            RepresentationType::Tonnetz => self.tonnetz(magnitude)?,
        };

        let mut block = values.mapv(|x| x as f32);
        scrub_logged(&mut block, kind.name());
        Ok(block)
    }

    /// Octave-band peak/valley difference in dB, one row per band plus the top band.
    ///
    /// Band 0 spans `[0, fmin]`, band `k` spans `[fmin·2^(k-1), fmin·2^k]` and
    /// the last band runs up to Nyquist. Each band after the first also takes
    /// the bin just below its lower edge.
    fn spectral_contrast(&self, magnitude: &Array2<f64>) -> Array2<f64> {
        let n_bands = self.config.contrast_bands;
        let freqs = fft_frequencies(self.config.n_fft, self.config.sample_rate as f64);
        let frames = magnitude.ncols();
        let mut contrast = Array2::zeros((n_bands + 1, frames));

        let mut edges = vec![0.0];
        edges.extend((0..=n_bands).map(|k| self.config.contrast_fmin * 2f64.powi(k as i32)));

        let mut column = Vec::with_capacity(freqs.len());
        for k in 0..=n_bands {
            let (low, high) = (edges[k], edges[k + 1]);
            let in_band: Vec<usize> = (0..freqs.len())
                .filter(|&i| freqs[i] >= low && freqs[i] <= high)
                .collect();
            let (Some(&first), Some(&last)) = (in_band.first(), in_band.last()) else {
                continue;
            };
            let start = if k > 0 { first.saturating_sub(1) } else { first };
            let end = if k == n_bands { freqs.len() } else { last + 1 };
            let band_len = end - start;
            // all but the top band drop their last bin
            let used_end = if k < n_bands { end - 1 } else { end };
            if used_end <= start {
                continue;
            }
            let alph = ((self.config.contrast_quantile * band_len as f64).round() as usize)
                .max(1)
                .min(used_end - start);

            for frame in 0..frames {
                column.clear();
                column.extend((start..used_end).map(|bin| magnitude[[bin, frame]]));
                column.sort_by(|a, b| a.total_cmp(b));
                let valley = column[..alph].iter().sum::<f64>() / alph as f64;
                let peak = column[column.len() - alph..].iter().sum::<f64>() / alph as f64;
                contrast[[k, frame]] =
                    10.0 * peak.max(POWER_FLOOR).log10() - 10.0 * valley.max(POWER_FLOOR).log10();
            }
        }
        contrast
    }

    /// Tonal centroid of the harmonic component, rows repeated to `tonnetz_rows`.
    fn tonnetz(&self, magnitude: &Array2<f64>) -> FeatureResult<Array2<f64>> {
        let harmonic = harmonic_magnitude(
            magnitude,
            self.config.harmonic_kernel,
            self.config.percussive_kernel,
        );
        let mut chroma = self.tonal_chroma_bank.dot(&power(&harmonic));
        for mut frame in chroma.axis_iter_mut(Axis(1)) {
            let total: f64 = frame.iter().map(|x| x.abs()).sum();
            if total > 0.0 {
                frame.mapv_inplace(|x| x / total);
            }
        }
        let centroid = self.tonal_basis.dot(&chroma);
        expand_rows(&centroid, self.config.tonnetz_rows)
    }
}

/// Repeats each row `target_rows / rows` times, keeping rows in order.
///
/// Fails with a `Configuration` error when `target_rows` is not a multiple of
/// the source row count.
pub fn expand_rows(block: &Array2<f64>, target_rows: usize) -> FeatureResult<Array2<f64>> {
    let rows = block.nrows();
    if rows == 0 || target_rows == 0 || target_rows % rows != 0 {
        return Err(FeatureError::Configuration(format!(
            "cannot expand {rows} rows to {target_rows}: not an integer multiple"
        )));
    }
    let factor = target_rows / rows;
    Ok(Array2::from_shape_fn((target_rows, block.ncols()), |(r, c)| {
        block[[r / factor, c]]
    }))
}

fn power(magnitude: &Array2<f64>) -> Array2<f64> {
    magnitude.mapv(|x| x * x)
}

fn normalize_frames_max(chroma: &mut Array2<f64>) {
    for mut frame in chroma.axis_iter_mut(Axis(1)) {
        let peak = frame.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
        if peak > 0.0 {
            frame.mapv_inplace(|x| x / peak);
        }
    }
}

/// Projection of 12 pitch classes onto circles of fifths, minor thirds and major thirds.
fn tonal_basis() -> Array2<f64> {
    let scale = [7.0 / 6.0, 7.0 / 6.0, 1.5, 1.5, 2.0 / 3.0, 2.0 / 3.0];
    let radius = [1.0, 1.0, 1.0, 1.0, 0.5, 0.5];
    let pitch = Array1::from_shape_fn(TONAL_CHROMA, |i| i as f64);
    Array2::from_shape_fn((TONAL_DIMENSIONS, TONAL_CHROMA), |(d, p)| {
        let mut v = scale[d] * pitch[p];
        if d % 2 == 0 {
            v -= 0.5;
        }
        radius[d] * (PI * v).cos()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::InstrumentFamily;
    use approx_eq::assert_approx_eq;

    fn tone(samples: usize) -> AudioClip {
        let data = Array1::from_shape_fn(samples, |i| {
            let t = i as f32 / 16_000.0;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                + 0.3 * (2.0 * std::f32::consts::PI * 1320.0 * t).sin()
        });
        AudioClip::new(data, 16_000, InstrumentFamily::Keyboard)
    }

    fn native_config() -> ExtractionConfig {
        ExtractionConfig {
            target_height: None,
            ..ExtractionConfig::new()
        }
    }

    #[test]
    fn test_native_shapes() {
        let extractor = FeatureExtractor::new(native_config()).unwrap();
        let clip = tone(1600);
        let samples = clip.samples().to_vec();
        let expected = [
            (RepresentationType::Stft, 1025),
            (RepresentationType::LogMel, 256),
            (RepresentationType::Mfcc, 60),
            (RepresentationType::Chroma, 64),
            (RepresentationType::SpectralContrast, 7),
            (RepresentationType::Tonnetz, 126),
        ];
        for (kind, rows) in expected {
            let block = extractor.extract(&samples, kind).unwrap();
            assert_eq!(block.dim(), (rows, 4), "{kind}");
            assert!(block.iter().all(|x| x.is_finite()), "{kind}");
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = FeatureExtractor::new(ExtractionConfig::new()).unwrap();
        let clip = tone(8000);
        for kind in RepresentationType::ALL {
            let a = extractor.extract_clip(&clip, kind).unwrap();
            let b = extractor.extract_clip(&clip, kind).unwrap();
            assert_eq!(a, b, "{kind}");
        }
    }

    #[test]
    fn test_extract_all_resizes_to_common_frames() {
        let config = ExtractionConfig {
            target_frames: Some(10),
            ..ExtractionConfig::new()
        };
        let extractor = FeatureExtractor::new(config).unwrap();
        let blocks = extractor.extract_all(&tone(1600)).unwrap();
        assert_eq!(blocks.len(), 6);
        assert_eq!(blocks[0].dim(), (1025, 10));
        for block in &blocks[1..] {
            assert_eq!(block.dim(), (300, 10));
        }
        assert_eq!(
            extractor.output_shape(RepresentationType::Chroma, 1600),
            (300, 10)
        );
    }

    #[test]
    fn test_chroma_frames_peak_at_one() {
        let extractor = FeatureExtractor::new(native_config()).unwrap();
        let block = extractor
            .extract(&tone(4000).samples().to_vec(), RepresentationType::Chroma)
            .unwrap();
        for frame in block.axis_iter(Axis(1)) {
            let peak = frame.iter().fold(0.0f32, |m, &x| m.max(x));
            assert_approx_eq!(peak as f64, 1.0, 1e-5);
        }
    }

    #[test]
    fn test_silence_is_finite() {
        let extractor = FeatureExtractor::new(ExtractionConfig::new()).unwrap();
        let clip = AudioClip::new(Array1::zeros(1600), 16_000, InstrumentFamily::Bass);
        let blocks = extractor.extract_all(&clip).unwrap();
        for block in &blocks {
            assert!(block.iter().all(|x| x.is_finite()));
        }
        // constant dB floor normalizes to zero
        assert!(blocks[0].iter().all(|&x| x == 0.0));
        assert!(blocks[3].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_expand_rows_repeats_in_place() {
        let block = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let expanded = expand_rows(&block, 6).unwrap();
        assert_eq!(expanded.column(0).to_vec(), vec![1.0, 1.0, 1.0, 3.0, 3.0, 3.0]);
        assert!(matches!(
            expand_rows(&block, 5),
            Err(FeatureError::Configuration(_))
        ));
    }

    #[test]
    fn test_tonal_basis_radii() {
        let basis = tonal_basis();
        assert_approx_eq!(basis[[1, 0]], 1.0, 1e-12);
        assert_approx_eq!(basis[[5, 0]], 0.5, 1e-12);
        assert_approx_eq!(basis[[0, 0]], 0.0, 1e-12);
    }

    #[test]
    fn test_rejects_wrong_sample_rate() {
        let extractor = FeatureExtractor::new(ExtractionConfig::new()).unwrap();
        let clip = AudioClip::new(Array1::zeros(1600), 22_050, InstrumentFamily::Bass);
        assert!(extractor.extract_clip(&clip, RepresentationType::Stft).is_err());
    }
}
