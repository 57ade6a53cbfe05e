//! Z-score normalization and non-finite scrubbing of feature blocks.

use ndarray::{Array2, ArrayBase, Data, DataMut, Dimension};
use num_traits::Float;
use tracing::warn;

use crate::{FeatureError, FeatureResult};

/// Replaces NaN and infinite values with zero, returning how many were replaced.
///
/// Works on any float element type, so `f64` spectra can be cleaned before
/// they are narrowed to `f32`.
pub fn scrub_non_finite<A, S, D>(array: &mut ArrayBase<S, D>) -> usize
where
    A: Float,
    S: DataMut<Elem = A>,
    D: Dimension,
{
    let mut replaced = 0;
    array.iter_mut().for_each(|x| {
        if !x.is_finite() {
            *x = A::zero();
            replaced += 1;
        }
    });
    replaced
}

/// Scrubs a block and logs a warning naming `context` when anything was replaced.
pub fn scrub_logged(block: &mut Array2<f32>, context: &str) {
    let replaced = scrub_non_finite(block);
    if replaced > 0 {
        warn!(context, non_finite = replaced, "replaced non-finite values with zero");
    }
}

/// Global z-score normalization: `(x - mean) / std` over all elements.
///
/// Non-finite values are zeroed first. The population standard deviation is
/// used and a zero deviation is treated as one. A constant block (after
/// scrubbing) normalizes to all zeros.
pub fn normalize(block: &Array2<f32>) -> Array2<f32> {
    let mut data = block.clone();
    scrub_non_finite(&mut data);
    if data.is_empty() {
        return data;
    }

    let (min, max) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    if min == max {
        data.fill(0.0);
        return data;
    }

    let n = data.len() as f64;
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / n;
    let variance = data
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let mut std = variance.sqrt();
    if std == 0.0 {
        std = 1.0;
    }

    data.mapv_inplace(|x| ((x as f64 - mean) / std) as f32);
    data
}

/// Strict check: fails with `DataQuality` if any value is NaN or infinite.
pub fn ensure_finite<A, S, D>(array: &ArrayBase<S, D>, context: &str) -> FeatureResult<()>
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
{
    let non_finite = array.iter().filter(|x| !x.is_finite()).count();
    if non_finite > 0 {
        return Err(FeatureError::DataQuality {
            context: context.to_string(),
            non_finite,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx_eq::assert_approx_eq;
    use ndarray::array;

    fn mean_std(a: &Array2<f32>) -> (f64, f64) {
        let n = a.len() as f64;
        let mean = a.iter().map(|&x| x as f64).sum::<f64>() / n;
        let var = a.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn test_normalize_zero_mean_unit_std() {
        let block = Array2::from_shape_fn((17, 23), |(i, j)| (i * 31 + j * 7) as f32 % 13.0 - 40.0);
        let (mean, std) = mean_std(&normalize(&block));
        assert!(mean.abs() < 1e-5);
        assert_approx_eq!(std, 1.0, 1e-4);
    }

    #[test]
    fn test_constant_block_normalizes_to_zero() {
        let block = Array2::from_elem((4, 5), -12.5f32);
        assert!(normalize(&block).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_non_finite_values_are_scrubbed() {
        let block = array![[f32::NAN, 1.0], [f32::INFINITY, 3.0]];
        let mut scrubbed = block.clone();
        assert_eq!(scrub_non_finite(&mut scrubbed), 2);
        assert_eq!(scrubbed, array![[0.0, 1.0], [0.0, 3.0]]);

        let normalized = normalize(&block);
        ensure_finite(&normalized, "test").unwrap();
        assert!(matches!(
            ensure_finite(&block, "test"),
            Err(FeatureError::DataQuality { non_finite: 2, .. })
        ));
    }

    #[test]
    fn test_scrub_double_precision() {
        let mut values = array![1.5f64, f64::NEG_INFINITY, f64::NAN];
        assert!(ensure_finite(&values, "f64").is_err());
        assert_eq!(scrub_non_finite(&mut values), 2);
        assert_eq!(values, array![1.5, 0.0, 0.0]);
        ensure_finite(&values, "f64").unwrap();
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let block = Array2::from_shape_fn((8, 8), |(i, j)| ((i + 1) as f32).ln() * j as f32);
        assert_eq!(normalize(&block), normalize(&block));
    }
}
