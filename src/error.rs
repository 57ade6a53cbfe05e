//! Error types and result utilities for the feature pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience type alias for results that may contain a [`FeatureError`].
pub type FeatureResult<T> = Result<T, FeatureError>;

/// Error types that can occur while building feature datasets.
#[derive(Error, Debug)]
pub enum FeatureError {
    /// Non-finite values were found where the caller required a clean array.
    ///
    /// The regular pipeline recovers from this by zeroing the offending values;
    /// this variant is only produced by the strict checks.
    #[error("Data quality error in {context}: {non_finite} non-finite values")]
    DataQuality {
        /// Where the values were found.
        context: String,
        /// Number of NaN or infinite entries.
        non_finite: usize,
    },

    /// An array does not have the shape its consumer expects.
    #[error("Shape mismatch in {context}: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        /// Where the comparison happened.
        context: String,
        /// Reference (rows, cols).
        expected: (usize, usize),
        /// Incoming (rows, cols).
        actual: (usize, usize),
    },

    /// The configuration cannot be honoured as written.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A family has no clips at all, so its quota cannot be back-filled.
    #[error("Quota shortfall for {family}: {available} clips available, {quota} required")]
    QuotaShortfall {
        /// Family name.
        family: String,
        /// Clips found.
        available: usize,
        /// Required per-family quota.
        quota: usize,
    },

    /// Error that occurs when invalid parameters are provided to an operation.
    #[error("Invalid parameter error: {0}")]
    InvalidParameter(String),

    /// Filesystem failure, annotated with the path involved.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path that was being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A persisted array or text file is malformed.
    #[error("Format error: {0}")]
    Format(String),

    /// WAV decoding failed.
    #[error("Audio decoding error: {0}")]
    Audio(#[from] hound::Error),

    /// Sample-rate conversion failed.
    #[error("Resampling error: {0}")]
    Resampling(String),

    /// The external model runtime reported a failure.
    #[error("Model runtime error: {0}")]
    Model(String),

    /// One family/feature iteration of a stage failed.
    #[error("Stage failure for {family}/{feature}: {source}")]
    Stage {
        /// Family being processed.
        family: String,
        /// Feature set being processed.
        feature: String,
        /// The underlying error.
        #[source]
        source: Box<FeatureError>,
    },
}

impl FeatureError {
    /// Wrap an I/O error together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Attach the failing family/feature pair to an error.
    pub fn stage(family: impl Into<String>, feature: impl Into<String>, source: FeatureError) -> Self {
        Self::Stage {
            family: family.into(),
            feature: feature.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for the error classes the pipeline normally recovers from locally.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FeatureError::DataQuality { .. } | FeatureError::ShapeMismatch { .. }
        )
    }
}
