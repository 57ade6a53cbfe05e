//! Training and validation sets assembled from persisted feature stacks.

use std::collections::BTreeMap;

use ndarray::{Array1, Array4, Axis};
use tracing::{debug, info, warn};

use crate::config::DatasetLayout;
use crate::family::{InstrumentFamily, LabelMap};
use crate::operations::resize::reconcile_shape;
use crate::operations::types::{FeatureSet, Interpolation};
use crate::storage::{load_stack, stack_blocks};
use crate::{FeatureBlock, FeatureError, FeatureResult};

/// Feature blocks of every family for one feature set, in stored order.
pub type FamilyDatasets = BTreeMap<InstrumentFamily, Vec<FeatureBlock>>;

/// Loads the stacks of every family in `label_map` for one feature set.
pub fn load_family_datasets(
    layout: &DatasetLayout,
    set: FeatureSet,
    label_map: &LabelMap,
) -> FeatureResult<FamilyDatasets> {
    label_map
        .families()
        .map(|family| load_stack(layout.features(family, set)).map(|blocks| (family, blocks)))
        .collect()
}

/// Stacks blocks into the `samples × rows × cols × 1` tensor classifiers consume.
pub fn to_input_tensor(blocks: &[FeatureBlock]) -> FeatureResult<Array4<f32>> {
    Ok(stack_blocks(blocks)?.insert_axis(Axis(3)))
}

/// Binary training set for one family.
#[derive(Debug, Clone, PartialEq)]
pub struct BinarySampleSet {
    /// Family the positives belong to.
    pub family: InstrumentFamily,
    /// Positives first, then negatives in label-map order.
    pub features: Vec<FeatureBlock>,
    /// 1 for positives, 0 for negatives.
    pub labels: Vec<u8>,
}

impl BinarySampleSet {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true when the set holds no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of positive samples.
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }

    /// Number of negative samples.
    pub fn negatives(&self) -> usize {
        self.len() - self.positives()
    }

    /// Input tensor for the model runtime.
    pub fn input_tensor(&self) -> FeatureResult<Array4<f32>> {
        to_input_tensor(&self.features)
    }

    /// Labels as floats for the model runtime.
    pub fn label_vector(&self) -> Array1<f32> {
        self.labels.iter().map(|&l| l as f32).collect()
    }
}

/// Builds the binary set for `family`: up to `cap` positives, then up to `cap`
/// negatives from every other family.
///
/// Negatives are not rebalanced, so with ten families the set is skewed about
/// 1:9 towards the negative class.
pub fn build_binary_set(
    datasets: &FamilyDatasets,
    label_map: &LabelMap,
    family: InstrumentFamily,
    cap: usize,
) -> FeatureResult<BinarySampleSet> {
    let positives = datasets.get(&family).ok_or_else(|| {
        FeatureError::InvalidParameter(format!("no samples loaded for {family}"))
    })?;

    let mut features: Vec<FeatureBlock> = positives.iter().take(cap).cloned().collect();
    let mut labels = vec![1u8; features.len()];

    for other in label_map.families().filter(|&f| f != family) {
        let Some(samples) = datasets.get(&other) else {
            warn!(%family, negative = %other, "no samples for negative family, skipping");
            continue;
        };
        let taken = samples.len().min(cap);
        features.extend(samples.iter().take(cap).cloned());
        labels.extend(std::iter::repeat_n(0u8, taken));
    }

    let set = BinarySampleSet {
        family,
        features,
        labels,
    };
    debug!(
        %family,
        positives = set.positives(),
        negatives = set.negatives(),
        "built binary set"
    );
    Ok(set)
}

/// Held-out samples labelled with dense family indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSet {
    /// Feature blocks, grouped by family in label-map order.
    pub features: Vec<FeatureBlock>,
    /// Dense family index of each block.
    pub labels: Vec<usize>,
}

impl ValidationSet {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true when the set holds no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Input tensor for the model runtime.
    pub fn input_tensor(&self) -> FeatureResult<Array4<f32>> {
        to_input_tensor(&self.features)
    }
}

/// Takes the last `tail` samples of every family.
///
/// Each sample is compared with the family's first (training-time) sample and
/// resized to its shape on mismatch; mismatches are logged.
pub fn build_validation_set(
    datasets: &FamilyDatasets,
    label_map: &LabelMap,
    tail: usize,
    interpolation: Interpolation,
) -> FeatureResult<ValidationSet> {
    let mut features = Vec::new();
    let mut labels = Vec::new();

    for entry in label_map.entries() {
        let samples = datasets.get(&entry.family).ok_or_else(|| {
            FeatureError::InvalidParameter(format!("no samples loaded for {}", entry.family))
        })?;
        let Some(reference) = samples.first().map(|b| b.dim()) else {
            warn!(family = %entry.family, "family has no samples, skipping");
            continue;
        };
        let start = samples.len().saturating_sub(tail);
        for (offset, block) in samples[start..].iter().enumerate() {
            let context = format!("validation/{}/{}", entry.family, start + offset);
            features.push(reconcile_shape(
                block.clone(),
                reference,
                interpolation,
                &context,
            )?);
            labels.push(entry.index);
        }
    }

    info!(samples = labels.len(), "built validation set");
    Ok(ValidationSet { features, labels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn datasets(per_family: usize, shape: (usize, usize)) -> FamilyDatasets {
        InstrumentFamily::ALL
            .iter()
            .enumerate()
            .map(|(k, &family)| {
                let blocks = (0..per_family)
                    .map(|i| Array2::from_elem(shape, (k * 1000 + i) as f32))
                    .collect();
                (family, blocks)
            })
            .collect()
    }

    #[test]
    fn test_balanced_builder_counts() {
        let data = datasets(200, (2, 3));
        let map = LabelMap::nsynth();
        let set = build_binary_set(&data, &map, InstrumentFamily::Mallet, 150).unwrap();
        assert_eq!(set.positives(), 150);
        assert_eq!(set.negatives(), 1350);
        assert!(set.labels[..150].iter().all(|&l| l == 1));
        // first negative comes from the first other family
        assert_eq!(set.features[150][[0, 0]], 0.0);
        assert_eq!(set.features[0][[0, 0]], 5000.0);
    }

    #[test]
    fn test_short_families_are_not_padded() {
        let mut data = datasets(200, (2, 3));
        data.insert(InstrumentFamily::Brass, vec![Array2::zeros((2, 3)); 40]);
        let set = build_binary_set(&data, &LabelMap::nsynth(), InstrumentFamily::Bass, 150).unwrap();
        assert_eq!(set.positives(), 150);
        assert_eq!(set.negatives(), 8 * 150 + 40);
    }

    #[test]
    fn test_input_tensor_has_channel_axis() {
        let data = datasets(3, (4, 5));
        let set = build_binary_set(&data, &LabelMap::nsynth(), InstrumentFamily::Reed, 2).unwrap();
        let tensor = set.input_tensor().unwrap();
        assert_eq!(tensor.shape(), &[20, 4, 5, 1]);
        assert_eq!(set.label_vector().sum(), 2.0);
    }

    #[test]
    fn test_validation_tail_is_reconciled() {
        let mut data = datasets(60, (4, 6));
        let vocal = data.get_mut(&InstrumentFamily::Vocal).unwrap();
        vocal[59] = Array2::ones((4, 5));

        let set = build_validation_set(&data, &LabelMap::nsynth(), 50, Interpolation::Cubic).unwrap();
        assert_eq!(set.len(), 500);
        assert!(set.features.iter().all(|b| b.dim() == (4, 6)));
        assert_eq!(set.labels[0], 0);
        assert_eq!(set.labels[499], 9);
        // last 50 of 60 start at sample 10
        assert_eq!(set.features[0][[0, 0]], 10.0);
    }
}
