// Correctness and logic
#![warn(clippy::unit_cmp)] // Detects comparing unit types
#![warn(clippy::match_same_arms)]
// Duplicate match arms

// Performance-focused
#![warn(clippy::inefficient_to_string)] // `format!("{}", x)` vs `x.to_string()`
#![warn(clippy::map_clone)] // Cloning inside `map()` unnecessarily
#![warn(clippy::unnecessary_to_owned)] // Detects redundant `.to_owned()` or `.clone()`
#![warn(clippy::large_stack_arrays)] // Helps avoid stack overflows
#![warn(clippy::needless_collect)] // Avoids `.collect().iter()` chains

// Style and idiomatic Rust
#![warn(clippy::redundant_clone)] // Detects unnecessary `.clone()`
#![warn(clippy::identity_op)] // e.g., `x + 0`, `x * 1`
#![warn(clippy::needless_return)] // Avoids `return` at the end of functions
#![warn(clippy::let_unit_value)] // Avoids binding `()` to variables
#![warn(clippy::manual_map)] // Use `.map()` instead of manual `match`
#![cfg_attr(not(test), warn(clippy::unwrap_used))] // Avoids using `unwrap()`

// Maintainability
#![warn(clippy::missing_panics_doc)] // Docs for functions that might panic
#![deny(missing_docs)] // Documentation is a must for release

//! # Multigram
//!
//! Turns short labelled instrument recordings into fixed-size 2D feature
//! blocks for instrument-family classification.
//!
//! ## Pipeline
//!
//! 1. **Ingest** ([`audio`]): WAV clips are resampled, padded or trimmed to a
//!    fixed length and stacked per family up to a quota.
//! 2. **Extract** ([`operations::extract`]): six representations (STFT, log-mel,
//!    MFCC, chroma, spectral contrast and tonnetz) are computed per clip,
//!    resized and z-score normalized.
//! 3. **Combine** ([`operations::combine`]): the six blocks are stacked
//!    vertically with zero padding bands between them.
//! 4. **Datasets** ([`dataset`], [`polyphony`]): balanced binary training
//!    sets, held-out validation sets and synthetic multi-instrument overlays.
//! 5. **Models** ([`model`], [`report`]): a pluggable [`model::ModelBackend`]
//!    trains one classifier per family; joint validation produces a
//!    [`report::ClassificationReport`].
//!
//! Stage drivers in [`pipeline`] persist each result as it is produced and
//! isolate failures per family and feature.
//!
//! ## Example
//!
//! ```rust,no_run
//! use multigram::{AudioClip, FeatureExtractor, InstrumentFamily, RepresentationType};
//! use multigram::config::ExtractionConfig;
//! use ndarray::Array1;
//!
//! let clip = AudioClip::new(Array1::zeros(16_000), 16_000, InstrumentFamily::Guitar);
//! let extractor = FeatureExtractor::new(ExtractionConfig::new())?;
//! let chroma = extractor.extract_clip(&clip, RepresentationType::Chroma)?;
//! assert_eq!(chroma.nrows(), 300);
//! # Ok::<(), multigram::FeatureError>(())
//! ```

mod error;

pub mod audio;
pub mod config;
pub mod dataset;
pub mod family;
pub mod model;
pub mod operations;
pub mod pipeline;
pub mod polyphony;
pub mod report;
pub mod resampling;
pub mod storage;

pub use audio::AudioClip;
pub use config::{DatasetLayout, PipelineConfig};
pub use error::{FeatureError, FeatureResult};
pub use family::{InstrumentFamily, LabelMap};
pub use operations::extract::FeatureExtractor;
pub use operations::types::{FeatureSet, Interpolation, RepresentationType};

/// A 2D feature block: rows are frequency-like, columns are time frames.
pub type FeatureBlock = ndarray::Array2<f32>;
