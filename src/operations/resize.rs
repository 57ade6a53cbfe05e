//! Separable 2-D resizing of feature blocks.
//!
//! Output pixel centres map back to the source with the half-pixel rule
//! `src = (dst + 0.5) * scale - 0.5`; taps outside the source replicate the
//! edge value.

use ndarray::{Array2, ArrayView2, Axis};
use tracing::warn;

use super::types::Interpolation;
use crate::{FeatureError, FeatureResult};

const CUBIC_A: f64 = -0.75;

/// Resizes `block` to `(rows, cols)`.
///
/// Non-finite source values are treated as zero so the output is always finite.
pub fn resize(
    block: &ArrayView2<f32>,
    shape: (usize, usize),
    interpolation: Interpolation,
) -> FeatureResult<Array2<f32>> {
    let (src_rows, src_cols) = block.dim();
    if src_rows == 0 || src_cols == 0 {
        return Err(FeatureError::InvalidParameter(
            "Cannot resize an empty block".to_string(),
        ));
    }
    if shape.0 == 0 || shape.1 == 0 {
        return Err(FeatureError::InvalidParameter(format!(
            "Target shape {shape:?} must be non-empty"
        )));
    }

    let source = block.mapv(|x| if x.is_finite() { x as f64 } else { 0.0 });
    if block.dim() == shape {
        return Ok(source.mapv(|x| x as f32));
    }

    let row_taps = taps(src_rows, shape.0, interpolation);
    let col_taps = taps(src_cols, shape.1, interpolation);

    let mut rows_done = Array2::<f64>::zeros((shape.0, src_cols));
    for (mut out_row, tap) in rows_done.axis_iter_mut(Axis(0)).zip(&row_taps) {
        for &(idx, weight) in tap {
            out_row.scaled_add(weight, &source.row(idx));
        }
    }

    let mut out = Array2::<f32>::zeros(shape);
    for (mut out_col, tap) in out.axis_iter_mut(Axis(1)).zip(&col_taps) {
        let mut acc = ndarray::Array1::<f64>::zeros(shape.0);
        for &(idx, weight) in tap {
            acc.scaled_add(weight, &rows_done.column(idx));
        }
        out_col.assign(&acc.mapv(|x| x as f32));
    }
    Ok(out)
}

/// Compares `block` with a reference shape and resizes it on mismatch.
///
/// A mismatch is logged with both shapes, since resizing does not guarantee
/// the frames still line up with the reference.
pub fn reconcile_shape(
    block: Array2<f32>,
    reference: (usize, usize),
    interpolation: Interpolation,
    context: &str,
) -> FeatureResult<Array2<f32>> {
    let actual = block.dim();
    if actual == reference {
        return Ok(block);
    }
    warn!(
        context,
        expected = ?reference,
        actual = ?actual,
        "shape mismatch, resizing to reference shape"
    );
    resize(&block.view(), reference, interpolation)
}

/// Strict shape check.
pub fn ensure_shape(
    block: &ArrayView2<f32>,
    expected: (usize, usize),
    context: &str,
) -> FeatureResult<()> {
    if block.dim() != expected {
        return Err(FeatureError::shape_mismatch(context, expected, block.dim()));
    }
    Ok(())
}

/// Source indices and weights contributing to each output position along one axis.
fn taps(src_len: usize, dst_len: usize, interpolation: Interpolation) -> Vec<Vec<(usize, f64)>> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len as isize - 1;
    let clamp = |i: isize| i.clamp(0, last) as usize;

    (0..dst_len)
        .map(|dst| {
            let src = (dst as f64 + 0.5) * scale - 0.5;
            let base = src.floor();
            let t = src - base;
            let base = base as isize;
            match interpolation {
                Interpolation::Linear => {
                    vec![(clamp(base), 1.0 - t), (clamp(base + 1), t)]
                }
                Interpolation::Cubic => {
                    let w = cubic_weights(t);
                    (0..4)
                        .map(|k| (clamp(base - 1 + k as isize), w[k]))
                        .collect()
                }
            }
        })
        .collect()
}

/// Keys cubic convolution weights for taps at offsets -1, 0, 1, 2.
fn cubic_weights(t: f64) -> [f64; 4] {
    let a = CUBIC_A;
    let w0 = ((a * (t + 1.0) - 5.0 * a) * (t + 1.0) + 8.0 * a) * (t + 1.0) - 4.0 * a;
    let w1 = ((a + 2.0) * t - (a + 3.0)) * t * t + 1.0;
    let w2 = ((a + 2.0) * (1.0 - t) - (a + 3.0)) * (1.0 - t) * (1.0 - t) + 1.0;
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx_eq::assert_approx_eq;
    use ndarray::array;

    #[test]
    fn test_linear_upsample_columns() {
        let block = array![[0.0f32, 10.0]];
        let out = resize(&block.view(), (1, 4), Interpolation::Linear).unwrap();
        let expected = [0.0, 2.5, 7.5, 10.0];
        for (got, want) in out.iter().zip(expected) {
            assert_approx_eq!(*got as f64, want, 1e-6);
        }
    }

    #[test]
    fn test_constant_block_stays_constant() {
        let block = Array2::from_elem((7, 5), 3.0f32);
        for interpolation in [Interpolation::Linear, Interpolation::Cubic] {
            let out = resize(&block.view(), (300, 12), interpolation).unwrap();
            assert_eq!(out.dim(), (300, 12));
            assert!(out.iter().all(|&x| (x - 3.0).abs() < 1e-5));
        }
    }

    #[test]
    fn test_cubic_weights_sum_to_one() {
        for t in [0.0, 0.25, 0.5, 0.9] {
            let w = cubic_weights(t);
            assert_approx_eq!(w.iter().sum::<f64>(), 1.0, 1e-12);
        }
        assert_eq!(cubic_weights(0.0)[1], 1.0);
    }

    #[test]
    fn test_output_is_finite() {
        let block = array![[f32::NAN, 1.0], [2.0, f32::INFINITY]];
        let out = resize(&block.view(), (3, 3), Interpolation::Cubic).unwrap();
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_reconcile_only_resizes_on_mismatch() {
        let block = Array2::from_shape_fn((4, 6), |(i, j)| (i * 6 + j) as f32);
        let same = reconcile_shape(block.clone(), (4, 6), Interpolation::Cubic, "t").unwrap();
        assert_eq!(same, block);

        let resized = reconcile_shape(block.clone(), (4, 5), Interpolation::Cubic, "t").unwrap();
        assert_eq!(resized.dim(), (4, 5));
        assert!(matches!(
            ensure_shape(&block.view(), (4, 5), "t"),
            Err(FeatureError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_empty() {
        let block = Array2::<f32>::zeros((0, 3));
        assert!(resize(&block.view(), (2, 2), Interpolation::Linear).is_err());
    }
}
