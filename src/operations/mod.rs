//! Feature operations.
//!
//! ## Module Organization
//!
//! - [`types`] - Representation and feature-set enums, window and interpolation kinds
//! - [`spectral`] - STFT, filter banks, DCT and harmonic separation
//! - [`extract`] - The six per-type extractors
//! - [`resize`] - Interpolated resizing and shape reconciliation
//! - [`normalize`] - Non-finite scrubbing and z-score normalization
//! - [`combine`] - Padded concatenation of the six blocks

pub mod combine;
pub mod extract;
pub mod normalize;
pub mod resize;
pub mod spectral;
pub mod types;

pub use combine::{combine, combined_rows};
pub use extract::{FeatureExtractor, TONAL_DIMENSIONS, expand_rows};
pub use normalize::{ensure_finite, normalize, scrub_non_finite};
pub use resize::{ensure_shape, reconcile_shape, resize};
pub use types::{FeatureSet, Interpolation, RepresentationType, WindowType};
