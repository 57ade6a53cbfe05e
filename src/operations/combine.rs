//! Concatenation of the six per-type blocks into one combined block.

use ndarray::{Array2, Axis, concatenate};

use super::normalize::{normalize, scrub_logged};
use super::types::RepresentationType;
use crate::{FeatureError, FeatureResult};

/// Row count of a combined block built from blocks with the given row counts.
pub fn combined_rows(rows: &[usize], padding_rows: usize) -> usize {
    rows.iter().sum::<usize>() + padding_rows * rows.len().saturating_sub(1)
}

/// Combines the six blocks of one sample, given in canonical type order.
///
/// Each block is normalized independently, a zero band of `padding_rows`
/// rows goes between consecutive blocks, and any non-finite value left in
/// the result is zeroed.
///
/// # Errors
/// `InvalidParameter` unless exactly six blocks are given, `ShapeMismatch`
/// if their column counts differ.
pub fn combine(blocks: &[Array2<f32>], padding_rows: usize) -> FeatureResult<Array2<f32>> {
    if blocks.len() != RepresentationType::ALL.len() {
        return Err(FeatureError::InvalidParameter(format!(
            "expected {} blocks to combine, got {}",
            RepresentationType::ALL.len(),
            blocks.len()
        )));
    }
    let cols = blocks[0].ncols();
    for (kind, block) in RepresentationType::ALL.iter().zip(blocks) {
        if block.ncols() != cols {
            return Err(FeatureError::shape_mismatch(
                format!("combine/{kind}"),
                (block.nrows(), cols),
                block.dim(),
            ));
        }
    }

    let padding = Array2::<f32>::zeros((padding_rows, cols));
    let normalized: Vec<Array2<f32>> = blocks.iter().map(normalize).collect();

    let mut pieces = Vec::with_capacity(normalized.len() * 2 - 1);
    for (i, block) in normalized.iter().enumerate() {
        if i > 0 {
            pieces.push(padding.view());
        }
        pieces.push(block.view());
    }

    let mut combined = concatenate(Axis(0), &pieces)
        .map_err(|e| FeatureError::InvalidParameter(format!("concatenation failed: {e}")))?;
    scrub_logged(&mut combined, "combine");
    Ok(combined)
}
