//! Synthetic multi-instrument validation samples.
//!
//! Each sample is the elementwise mean of combined blocks drawn from `k`
//! distinct families, labelled with a multi-hot vector. A noise class of
//! standard-normal blocks with an all-zero label stands in for silence.
//!
//! The mean is unweighted even though the blocks are normalized
//! independently.

use std::f64::consts::PI;

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::{DatasetConfig, PipelineConfig};
use crate::dataset::{FamilyDatasets, load_family_datasets};
use crate::family::LabelMap;
use crate::operations::normalize::scrub_logged;
use crate::operations::types::FeatureSet;
use crate::storage::{save_stack, write_array};
use crate::{FeatureBlock, FeatureError, FeatureResult};

/// Synthesized samples and their multi-hot labels.
#[derive(Debug, Clone, PartialEq)]
pub struct PolyphonicSet {
    /// Overlaid blocks, noise first, then k = 1, 2, ... instruments.
    pub samples: Vec<FeatureBlock>,
    /// One row per sample, one column per family (dense index).
    pub labels: Array2<u8>,
}

impl PolyphonicSet {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true when the set holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of sounding instruments per sample.
    pub fn instrument_counts(&self) -> Vec<usize> {
        self.labels
            .axis_iter(Axis(0))
            .map(|row| row.iter().filter(|&&v| v == 1).count())
            .collect()
    }
}

/// RNG for synthesis; seeded when a seed is configured.
pub fn synthesis_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Builds the polyphonic set from per-family pools of combined blocks.
///
/// Only the first `polyphony_pool` blocks of each family are drawn from. All
/// pool blocks must share one shape, which is also the shape of the noise
/// samples.
pub fn synthesize<R: Rng + ?Sized>(
    datasets: &FamilyDatasets,
    label_map: &LabelMap,
    config: &DatasetConfig,
    rng: &mut R,
) -> FeatureResult<PolyphonicSet> {
    let families = label_map.len();
    let mut pools: Vec<&[FeatureBlock]> = Vec::with_capacity(families);
    for entry in label_map.entries() {
        let blocks = datasets.get(&entry.family).map(Vec::as_slice).unwrap_or(&[]);
        if blocks.is_empty() {
            return Err(FeatureError::InvalidParameter(format!(
                "no combined blocks for {}",
                entry.family
            )));
        }
        pools.push(&blocks[..blocks.len().min(config.polyphony_pool)]);
    }
    if config.max_instruments == 0 || config.max_instruments > families {
        return Err(FeatureError::Configuration(format!(
            "max_instruments must be in 1..={families}"
        )));
    }

    let shape = pools[0][0].dim();
    for (entry, pool) in label_map.entries().iter().zip(&pools) {
        if let Some(bad) = pool.iter().find(|b| b.dim() != shape) {
            return Err(FeatureError::shape_mismatch(
                format!("polyphony pool/{}", entry.family),
                shape,
                bad.dim(),
            ));
        }
    }

    let per = config.polyphony_per_combination;
    let total = per * (config.max_instruments + 1);
    let mut samples = Vec::with_capacity(total);
    let mut labels = Array2::<u8>::zeros((total, families));

    for _ in 0..per {
        samples.push(standard_normal_block(shape, rng));
    }

    for k in 1..=config.max_instruments {
        for _ in 0..per {
            let row = samples.len();
            let chosen = rand::seq::index::sample(rng, families, k);
            let mut overlay = Array2::<f32>::zeros(shape);
            for family_idx in chosen.iter() {
                let pool = pools[family_idx];
                let pick = rng.random_range(0..pool.len());
                overlay += &pool[pick];
                labels[[row, label_map.entries()[family_idx].index]] = 1;
            }
            overlay /= k as f32;
            scrub_logged(&mut overlay, "polyphony");
            samples.push(overlay);
        }
        debug!(instruments = k, samples = per, "synthesized overlays");
    }

    Ok(PolyphonicSet { samples, labels })
}

/// Loads the combined pools, synthesizes the set and persists samples and labels.
pub fn run_polyphony(config: &PipelineConfig, label_map: &LabelMap) -> FeatureResult<PolyphonicSet> {
    let layout = config.layout();
    let datasets = load_family_datasets(&layout, FeatureSet::Combined, label_map)?;
    let mut rng = synthesis_rng(config.dataset.seed);
    let set = synthesize(&datasets, label_map, &config.dataset, &mut rng)?;

    save_stack(layout.polyphonic_samples(), &set.samples)?;
    write_array(layout.polyphonic_labels(), &set.labels)?;
    info!(
        samples = set.len(),
        path = %layout.polyphonic_samples().display(),
        "stored polyphonic validation set"
    );
    Ok(set)
}

/// Independent standard-normal values via the Box-Muller transform.
fn standard_normal_block<R: Rng + ?Sized>(shape: (usize, usize), rng: &mut R) -> Array2<f32> {
    let mut values = Vec::with_capacity(shape.0 * shape.1 + 1);
    while values.len() < shape.0 * shape.1 {
        // (0, 1] keeps the logarithm finite
        let u1: f64 = 1.0 - rng.random::<f64>();
        let u2: f64 = rng.random::<f64>();
        let radius = (-2.0 * u1.ln()).sqrt();
        values.push((radius * (2.0 * PI * u2).cos()) as f32);
        values.push((radius * (2.0 * PI * u2).sin()) as f32);
    }
    values.truncate(shape.0 * shape.1);
    Array2::from_shape_vec(shape, values).unwrap_or_else(|_| Array2::zeros(shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::InstrumentFamily;
    use crate::storage::read_array;
    use ndarray::Array3;

    fn pools(shape: (usize, usize)) -> FamilyDatasets {
        InstrumentFamily::ALL
            .iter()
            .enumerate()
            .map(|(k, &family)| {
                let blocks = (0..60)
                    .map(|i| Array2::from_elem(shape, (k * 100 + i) as f32))
                    .collect();
                (family, blocks)
            })
            .collect()
    }

    #[test]
    fn test_labels_count_instruments() {
        let config = DatasetConfig::new();
        let mut rng = synthesis_rng(Some(7));
        let set = synthesize(&pools((6, 4)), &LabelMap::nsynth(), &config, &mut rng).unwrap();
        assert_eq!(set.len(), 10 * 10 + 10);
        assert_eq!(set.labels.dim(), (110, 10));

        let counts = set.instrument_counts();
        assert!(counts[..10].iter().all(|&c| c == 0));
        for k in 1..=10 {
            let start = 10 * k;
            assert!(counts[start..start + 10].iter().all(|&c| c == k));
        }
        assert!(set.samples.iter().all(|s| s.dim() == (6, 4)));
    }

    #[test]
    fn test_overlay_is_mean_of_pool_draws() {
        let config = DatasetConfig {
            max_instruments: 1,
            polyphony_per_combination: 5,
            ..DatasetConfig::new()
        };
        let mut rng = synthesis_rng(Some(3));
        let set = synthesize(&pools((2, 2)), &LabelMap::nsynth(), &config, &mut rng).unwrap();
        for (sample, label) in set.samples[5..].iter().zip(set.labels.axis_iter(Axis(0)).skip(5)) {
            let family = label.iter().position(|&v| v == 1).unwrap();
            let value = sample[[0, 0]] as usize;
            assert_eq!(value / 100, family);
            // only the first 50 blocks are drawn from
            assert!(value % 100 < 50);
        }
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let config = DatasetConfig::new();
        let data = pools((3, 3));
        let a = synthesize(&data, &LabelMap::nsynth(), &config, &mut synthesis_rng(Some(42))).unwrap();
        let b = synthesize(&data, &LabelMap::nsynth(), &config, &mut synthesis_rng(Some(42))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_noise_is_roughly_standard() {
        let mut rng = synthesis_rng(Some(11));
        let block = standard_normal_block((100, 100), &mut rng);
        let n = block.len() as f64;
        let mean = block.iter().map(|&x| x as f64).sum::<f64>() / n;
        let var = block.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_run_polyphony_persists_samples_and_labels() {
        let base = std::env::temp_dir().join(format!("multigram-poly-{}", std::process::id()));
        std::fs::remove_dir_all(&base).ok();
        let mut config = PipelineConfig::new(base.join("data"), base.join("out"));
        config.dataset.seed = Some(5);
        config.dataset.polyphony_per_combination = 2;
        config.dataset.max_instruments = 3;
        let layout = config.layout();
        for (family, blocks) in pools((3, 2)) {
            save_stack(layout.features(family, FeatureSet::Combined), &blocks[..4]).unwrap();
        }

        let set = run_polyphony(&config, &LabelMap::nsynth()).unwrap();
        assert_eq!(set.len(), 2 * 3 + 2);

        let samples: Array3<f32> = read_array(layout.polyphonic_samples()).unwrap();
        let labels: Array2<u8> = read_array(layout.polyphonic_labels()).unwrap();
        assert_eq!(samples.dim(), (8, 3, 2));
        assert_eq!(labels, set.labels);
        for (i, block) in set.samples.iter().enumerate() {
            assert_eq!(samples.index_axis(Axis(0), i), block.view());
        }
        let counts: Vec<usize> = labels
            .axis_iter(Axis(0))
            .map(|row| row.iter().map(|&v| v as usize).sum())
            .collect();
        assert_eq!(counts, vec![0, 0, 1, 1, 2, 2, 3, 3]);

        std::fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn test_pool_shape_mismatch() {
        let mut data = pools((3, 3));
        data.get_mut(&InstrumentFamily::Organ).unwrap()[2] = Array2::zeros((3, 4));
        let err = synthesize(
            &data,
            &LabelMap::nsynth(),
            &DatasetConfig::new(),
            &mut synthesis_rng(Some(1)),
        )
        .unwrap_err();
        assert!(matches!(err, FeatureError::ShapeMismatch { .. }));
    }
}
