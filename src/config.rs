//! Pipeline configuration and the on-disk layout derived from it.
//!
//! Every stage receives a [`PipelineConfig`] (or one of its parts) explicitly.
//! Paths are never ambient; [`DatasetLayout`] is the single place that turns a
//! family/feature pair into a file name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::family::InstrumentFamily;
use crate::operations::extract::TONAL_DIMENSIONS;
use crate::operations::types::{FeatureSet, Interpolation, RepresentationType, WindowType};
use crate::{FeatureError, FeatureResult};

/// Parameters of the six feature extractors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Sample rate every clip is brought to before extraction.
    pub sample_rate: u32,
    /// FFT size shared by all spectral types.
    pub n_fft: usize,
    /// Hop length in samples.
    pub hop_length: usize,
    /// Analysis window.
    pub window: WindowType,
    /// Mel bands of the log-mel representation.
    pub n_mels: usize,
    /// Cepstral coefficients kept.
    pub n_mfcc: usize,
    /// Mel bands the cepstral coefficients are computed from.
    pub mfcc_mels: usize,
    /// Chroma bins per octave.
    pub n_chroma: usize,
    /// Spectral contrast octave bands (the output has one more row).
    pub contrast_bands: usize,
    /// Lower edge of the first contrast band in Hz.
    pub contrast_fmin: f64,
    /// Fraction of each band used for peak and valley estimates.
    pub contrast_quantile: f64,
    /// Row count the six-row tonal centroid block is expanded to. Must be a multiple of 6.
    pub tonnetz_rows: usize,
    /// Median filter length along time for harmonic enhancement.
    pub harmonic_kernel: usize,
    /// Median filter length along frequency for percussive enhancement.
    pub percussive_kernel: usize,
    /// Dynamic range kept below the peak when converting to dB.
    pub top_db: f64,
    /// Row count every type except the linear spectrum is resized to.
    pub target_height: Option<usize>,
    /// Common frame count for all blocks. `None` keeps the natural count.
    pub target_frames: Option<usize>,
    /// Kernel used for extraction-time resizing.
    pub interpolation: Interpolation,
}

impl ExtractionConfig {
    /// Defaults used for the 16 kHz instrument corpus.
    pub const fn new() -> Self {
        Self {
            sample_rate: 16_000,
            n_fft: 2048,
            hop_length: 512,
            window: WindowType::Hanning,
            n_mels: 256,
            n_mfcc: 60,
            mfcc_mels: 128,
            n_chroma: 64,
            contrast_bands: 6,
            contrast_fmin: 200.0,
            contrast_quantile: 0.02,
            tonnetz_rows: 126,
            harmonic_kernel: 31,
            percussive_kernel: 31,
            top_db: 80.0,
            target_height: Some(300),
            target_frames: None,
            interpolation: Interpolation::Linear,
        }
    }

    /// Native row count of a representation before any resizing.
    pub const fn native_rows(&self, kind: RepresentationType) -> usize {
        match kind {
            RepresentationType::Stft => self.n_fft / 2 + 1,
            RepresentationType::LogMel => self.n_mels,
            RepresentationType::Mfcc => self.n_mfcc,
            RepresentationType::Chroma => self.n_chroma,
            RepresentationType::SpectralContrast => self.contrast_bands + 1,
            RepresentationType::Tonnetz => self.tonnetz_rows,
        }
    }

    /// Row count of a representation as persisted.
    pub fn output_rows(&self, kind: RepresentationType) -> usize {
        match self.target_height {
            Some(height) if kind.resized_to_target_height() => height,
            _ => self.native_rows(kind),
        }
    }

    /// Natural frame count for a clip of `samples` samples (centered frames).
    pub const fn frames_for(&self, samples: usize) -> usize {
        1 + samples / self.hop_length
    }

    /// Validate the configuration.
    pub fn validate(&self) -> FeatureResult<()> {
        if self.sample_rate == 0 {
            return Err(config_err("sample_rate must be > 0"));
        }
        if self.n_fft < 2 || self.hop_length == 0 {
            return Err(config_err("n_fft must be >= 2 and hop_length > 0"));
        }
        if self.hop_length > self.n_fft {
            return Err(config_err("hop_length cannot exceed n_fft"));
        }
        if self.n_mels == 0 || self.mfcc_mels == 0 || self.n_chroma == 0 {
            return Err(config_err("band counts must be > 0"));
        }
        if self.n_mfcc == 0 || self.n_mfcc > self.mfcc_mels {
            return Err(config_err("n_mfcc must be in 1..=mfcc_mels"));
        }
        if self.contrast_bands == 0 || !(0.0..0.5).contains(&self.contrast_quantile) {
            return Err(config_err(
                "contrast_bands must be > 0 and contrast_quantile in [0, 0.5)",
            ));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if self.contrast_fmin <= 0.0
            || self.contrast_fmin * 2f64.powi(self.contrast_bands as i32 - 1) >= nyquist
        {
            return Err(config_err(format!(
                "contrast bands starting at {} Hz exceed the Nyquist frequency {nyquist} Hz",
                self.contrast_fmin
            )));
        }
        if self.tonnetz_rows == 0 || self.tonnetz_rows % TONAL_DIMENSIONS != 0 {
            return Err(config_err(format!(
                "tonnetz_rows ({}) must be a positive multiple of {TONAL_DIMENSIONS}",
                self.tonnetz_rows
            )));
        }
        if self.top_db <= 0.0 {
            return Err(config_err("top_db must be > 0"));
        }
        if matches!(self.target_height, Some(0)) || matches!(self.target_frames, Some(0)) {
            return Err(config_err("target sizes must be > 0"));
        }
        Ok(())
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample counts used when assembling datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Clips kept per family.
    pub quota: usize,
    /// Fixed waveform length clips are padded or truncated to.
    pub clip_samples: usize,
    /// Samples taken per family when building a binary training set.
    pub training_cap: usize,
    /// Samples taken from the end of each family for validation.
    pub validation_tail: usize,
    /// Combined blocks per family drawn on for polyphonic overlays.
    pub polyphony_pool: usize,
    /// Samples generated per instrument count (and for the noise class).
    pub polyphony_per_combination: usize,
    /// Largest number of simultaneous instruments.
    pub max_instruments: usize,
    /// Zero rows between consecutive blocks in a combined block.
    pub padding_rows: usize,
    /// Seed for polyphonic synthesis. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl DatasetConfig {
    /// Defaults for the 200-per-family corpus.
    pub const fn new() -> Self {
        Self {
            quota: 200,
            clip_samples: 64_000,
            training_cap: 150,
            validation_tail: 50,
            polyphony_pool: 50,
            polyphony_per_combination: 10,
            max_instruments: 10,
            padding_rows: 5,
            seed: None,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self, family_count: usize) -> FeatureResult<()> {
        if self.quota == 0 || self.clip_samples == 0 {
            return Err(config_err("quota and clip_samples must be > 0"));
        }
        if self.training_cap == 0 || self.validation_tail == 0 || self.polyphony_pool == 0 {
            return Err(config_err("sample counts must be > 0"));
        }
        if self.validation_tail > self.quota {
            return Err(config_err("validation_tail cannot exceed quota"));
        }
        if self.max_instruments == 0 || self.max_instruments > family_count {
            return Err(config_err(format!(
                "max_instruments must be in 1..={family_count}"
            )));
        }
        Ok(())
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Fit parameters handed to the external model runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Fraction of the training set held out for validation loss.
    pub validation_split: f64,
    /// Maximum epochs.
    pub epochs: usize,
    /// Early stopping patience on validation loss, in epochs.
    pub early_stopping_patience: usize,
    /// Learning-rate plateau patience, in epochs.
    pub lr_plateau_patience: usize,
    /// Multiplicative learning-rate reduction on plateau.
    pub lr_factor: f64,
    /// Learning-rate floor.
    pub min_lr: f64,
}

impl TrainingParams {
    /// Defaults used for the per-family binary classifiers.
    pub const fn new() -> Self {
        Self {
            validation_split: 0.3,
            epochs: 1000,
            early_stopping_patience: 300,
            lr_plateau_patience: 150,
            lr_factor: 0.5,
            min_lr: 1e-7,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> FeatureResult<()> {
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(config_err("validation_split must be in [0, 1)"));
        }
        if self.epochs == 0 {
            return Err(config_err("epochs must be > 0"));
        }
        if !(0.0..1.0).contains(&self.lr_factor) || self.lr_factor == 0.0 {
            return Err(config_err("lr_factor must be in (0, 1)"));
        }
        Ok(())
    }
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete configuration passed to each stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding waveforms and feature arrays.
    pub base_dir: PathBuf,
    /// Directory holding models, metric curves and test results.
    pub output_dir: PathBuf,
    /// Extractor parameters.
    pub extraction: ExtractionConfig,
    /// Dataset sizes.
    pub dataset: DatasetConfig,
    /// Model fit parameters.
    pub training: TrainingParams,
}

impl PipelineConfig {
    /// Default configuration rooted at the given directories.
    pub fn new(base_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            output_dir: output_dir.into(),
            extraction: ExtractionConfig::new(),
            dataset: DatasetConfig::new(),
            training: TrainingParams::new(),
        }
    }

    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> FeatureResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| FeatureError::io(path, e))?;
        let config: PipelineConfig = serde_json::from_str(&text).map_err(|e| {
            FeatureError::Configuration(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> FeatureResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FeatureError::Configuration(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| FeatureError::io(path, e))
    }

    /// Validate every part against the default ten-family label map.
    pub fn validate(&self) -> FeatureResult<()> {
        self.extraction.validate()?;
        self.dataset.validate(InstrumentFamily::ALL.len())?;
        self.training.validate()
    }

    /// Replaces the base and output directories that are given, keeping the others.
    pub fn with_dirs(mut self, base_dir: Option<PathBuf>, output_dir: Option<PathBuf>) -> Self {
        if let Some(base_dir) = base_dir {
            self.base_dir = base_dir;
        }
        if let Some(output_dir) = output_dir {
            self.output_dir = output_dir;
        }
        self
    }

    /// Layout of files under the configured directories.
    pub fn layout(&self) -> DatasetLayout {
        DatasetLayout::new(&self.base_dir, &self.output_dir)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new("data", "output")
    }
}

/// Directory conventions for every persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    base_dir: PathBuf,
    output_dir: PathBuf,
}

impl DatasetLayout {
    /// Layout rooted at the given directories.
    pub fn new(base_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Raw waveforms of one family.
    pub fn clips(&self, family: InstrumentFamily) -> PathBuf {
        self.base_dir.join(format!("{family}.npy"))
    }

    /// Feature stack of one family for one feature set.
    pub fn features(&self, family: InstrumentFamily, set: FeatureSet) -> PathBuf {
        match set {
            FeatureSet::Single(kind) => self
                .base_dir
                .join(kind.name())
                .join(family.name())
                .join(format!("{family}_{kind}.npy")),
            FeatureSet::Combined => self
                .base_dir
                .join(FeatureSet::COMBINED_NAME)
                .join(format!("{family}_combined.npy")),
        }
    }

    /// Synthesized polyphonic validation features.
    pub fn polyphonic_samples(&self) -> PathBuf {
        self.base_dir.join("validation_samples.npy")
    }

    /// Multi-hot labels of the polyphonic validation set.
    pub fn polyphonic_labels(&self) -> PathBuf {
        self.base_dir.join("validation_labels.npy")
    }

    /// Serialized classifier for one family and feature set.
    pub fn model(&self, set: FeatureSet, family: InstrumentFamily) -> PathBuf {
        self.output_dir
            .join("models")
            .join(set.name())
            .join(format!("{set}_{family}.model"))
    }

    /// Loss curve file for one family and feature set.
    pub fn loss_curve(&self, set: FeatureSet, family: InstrumentFamily) -> PathBuf {
        self.metrics_dir(set)
            .join(format!("{set}_{family}_loss_curve.txt"))
    }

    /// Accuracy curve file for one family and feature set.
    pub fn accuracy_curve(&self, set: FeatureSet, family: InstrumentFamily) -> PathBuf {
        self.metrics_dir(set)
            .join(format!("{set}_{family}_acc_curve.txt"))
    }

    /// True labels written by validation.
    pub fn true_labels(&self, set: FeatureSet) -> PathBuf {
        self.test_results_dir()
            .join(format!("{set}_true_labels.txt"))
    }

    /// Predicted labels written by validation.
    pub fn predicted_labels(&self, set: FeatureSet) -> PathBuf {
        self.test_results_dir()
            .join(format!("{set}_predicted_labels.txt"))
    }

    fn metrics_dir(&self, set: FeatureSet) -> PathBuf {
        self.output_dir.join("metrics").join(set.name())
    }

    fn test_results_dir(&self) -> PathBuf {
        self.output_dir.join("test_results")
    }
}

/// Creates the parent directory of `path` if needed.
pub(crate) fn ensure_parent(path: &Path) -> FeatureResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| FeatureError::io(parent, e))?;
        }
    }
    Ok(())
}

fn config_err(message: impl Into<String>) -> FeatureError {
    FeatureError::Configuration(message.into())
}
