//! Supporting types and enums for feature operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FeatureError;

/// The six audio-to-2D feature transforms, in canonical combination order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentationType {
    /// Short-time Fourier magnitude in dB.
    Stft,
    /// Mel power spectrum in dB.
    LogMel,
    /// Mel-frequency cepstral coefficients.
    Mfcc,
    /// Chromagram computed from the STFT.
    Chroma,
    /// Octave-band spectral contrast.
    SpectralContrast,
    /// Tonal centroid features (tonnetz), row-expanded.
    Tonnetz,
}

impl RepresentationType {
    /// All types in canonical order.
    pub const ALL: [RepresentationType; 6] = [
        RepresentationType::Stft,
        RepresentationType::LogMel,
        RepresentationType::Mfcc,
        RepresentationType::Chroma,
        RepresentationType::SpectralContrast,
        RepresentationType::Tonnetz,
    ];

    /// Name used for directories and file names.
    pub const fn name(&self) -> &'static str {
        match self {
            RepresentationType::Stft => "stft",
            RepresentationType::LogMel => "log_mel",
            RepresentationType::Mfcc => "mfcc",
            RepresentationType::Chroma => "chroma",
            RepresentationType::SpectralContrast => "spectral_contrast",
            RepresentationType::Tonnetz => "tonnetz",
        }
    }

    /// Whether the block is resized to the configured target height after extraction.
    ///
    /// The linear spectrum keeps its native bin count.
    pub const fn resized_to_target_height(&self) -> bool {
        !matches!(self, RepresentationType::Stft)
    }
}

impl fmt::Display for RepresentationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RepresentationType {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepresentationType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s.trim())
            .ok_or_else(|| FeatureError::InvalidParameter(format!("unknown representation '{s}'")))
    }
}

/// A feature set a classifier is trained on: one representation or the combined block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// A single representation.
    Single(RepresentationType),
    /// All six representations concatenated with padding.
    Combined,
}

impl FeatureSet {
    /// Storage name of the combined set.
    pub const COMBINED_NAME: &'static str = "all_combined_with_padding";

    /// The six single sets followed by the combined set.
    pub fn all() -> Vec<FeatureSet> {
        RepresentationType::ALL
            .iter()
            .map(|&t| FeatureSet::Single(t))
            .chain(std::iter::once(FeatureSet::Combined))
            .collect()
    }

    /// Name used for directories and file names.
    pub const fn name(&self) -> &'static str {
        match self {
            FeatureSet::Single(t) => t.name(),
            FeatureSet::Combined => Self::COMBINED_NAME,
        }
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureSet {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == Self::COMBINED_NAME || s.trim() == "combined" {
            return Ok(FeatureSet::Combined);
        }
        s.parse::<RepresentationType>().map(FeatureSet::Single)
    }
}

/// Window function applied to each STFT frame.
#[derive(Debug, Clone, PartialEq, Copy, Default, Serialize, Deserialize)]
pub enum WindowType {
    /// Rectangular window (no windowing)
    Rectangular,
    /// Periodic Hann window
    #[default]
    Hanning,
    /// Hamming window
    Hamming,
}

/// Interpolation kernel used when resizing a feature block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Bilinear interpolation.
    #[default]
    Linear,
    /// Bicubic interpolation (Keys kernel, a = -0.75).
    Cubic,
}
