//! Seam to the external model runtime: training and validation drivers.
//!
//! The crate does not implement a neural network. A [`ModelBackend`] fits and
//! (de)serializes per-family binary classifiers; this module feeds it the
//! assembled tensors, persists models and metric curves, and evaluates the
//! family classifiers jointly.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView4};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::config::TrainingParams;
use crate::dataset::{build_binary_set, build_validation_set, load_family_datasets};
use crate::family::LabelMap;
use crate::operations::types::{FeatureSet, Interpolation};
use crate::pipeline::{ErrorHandling, StageReport};
use crate::report::ClassificationReport;
use crate::storage::{write_curve, write_labels};
use crate::{FeatureError, FeatureResult};

/// A trained binary classifier.
pub trait BinaryClassifier {
    /// Positive-class probability for each sample of a `samples × rows × cols × 1` tensor.
    fn predict(&self, inputs: ArrayView4<f32>) -> FeatureResult<Array1<f32>>;
}

/// Per-epoch metrics reported by a fit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    /// Training loss per epoch.
    pub loss: Vec<f64>,
    /// Training accuracy per epoch.
    pub accuracy: Vec<f64>,
}

/// External model runtime.
pub trait ModelBackend {
    /// Classifier type produced by this runtime.
    type Model: BinaryClassifier;

    /// Acquires the accelerator context for one training run.
    fn acquire(&mut self) -> FeatureResult<()>;

    /// Releases whatever [`acquire`](Self::acquire) accumulated.
    fn release(&mut self);

    /// Fits a fresh classifier on `inputs` with 0/1 `labels`.
    fn fit(
        &mut self,
        inputs: ArrayView4<f32>,
        labels: ArrayView1<f32>,
        params: &TrainingParams,
    ) -> FeatureResult<(Self::Model, TrainingHistory)>;

    /// Persists a classifier.
    fn save(&self, model: &Self::Model, path: &Path) -> FeatureResult<()>;

    /// Loads a persisted classifier.
    fn load(&self, path: &Path) -> FeatureResult<Self::Model>;
}

/// Accelerator context held for the duration of one training run.
///
/// The context is released when the scope is dropped, on every exit path.
pub struct AcceleratorScope<'a, B: ModelBackend> {
    backend: &'a mut B,
}

impl<'a, B: ModelBackend> AcceleratorScope<'a, B> {
    /// Acquires the backend's accelerator context.
    pub fn new(backend: &'a mut B) -> FeatureResult<Self> {
        backend.acquire()?;
        Ok(Self { backend })
    }
}

impl<B: ModelBackend> Deref for AcceleratorScope<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: ModelBackend> DerefMut for AcceleratorScope<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: ModelBackend> Drop for AcceleratorScope<'_, B> {
    fn drop(&mut self) {
        self.backend.release();
        debug!("released accelerator context");
    }
}

/// Trains one classifier per family for `set`, persisting models and curves.
///
/// Each family is trained inside its own [`AcceleratorScope`]; failures are
/// isolated per family according to `handling`.
pub fn train_feature_set<B: ModelBackend>(
    backend: &mut B,
    config: &PipelineConfig,
    label_map: &LabelMap,
    set: FeatureSet,
    handling: ErrorHandling,
) -> FeatureResult<StageReport> {
    let layout = config.layout();
    let datasets = load_family_datasets(&layout, set, label_map)?;
    let mut report = StageReport::new(format!("train/{set}"));
    info!(%set, "training feature set");

    for family in label_map.families() {
        let result = build_binary_set(&datasets, label_map, family, config.dataset.training_cap)
            .and_then(|samples| {
                let inputs = samples.input_tensor()?;
                let labels = samples.label_vector();
                info!(
                    %family,
                    positives = samples.positives(),
                    negatives = samples.negatives(),
                    "fitting classifier"
                );

                let mut scope = AcceleratorScope::new(backend)?;
                let (model, history) = scope.fit(inputs.view(), labels.view(), &config.training)?;
                scope.save(&model, &layout.model(set, family))?;
                drop(scope);

                write_curve(layout.loss_curve(set, family), &history.loss)?;
                write_curve(layout.accuracy_curve(set, family), &history.accuracy)
            });
        report.record(family, set.name(), result, handling)?;
    }
    Ok(report)
}

/// Outcome of validating one feature set.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Dense index of each sample's family.
    pub truth: Vec<usize>,
    /// Argmax over the family classifiers' probabilities.
    pub predicted: Vec<usize>,
    /// Metrics over `truth` and `predicted`.
    pub report: ClassificationReport,
}

/// Runs every family classifier on the held-out samples of `set`.
///
/// A sample is assigned to the family whose classifier gives it the highest
/// probability. True and predicted labels are written as text files.
pub fn validate_feature_set<B: ModelBackend>(
    backend: &B,
    config: &PipelineConfig,
    label_map: &LabelMap,
    set: FeatureSet,
) -> FeatureResult<ValidationOutcome> {
    let layout = config.layout();
    let datasets = load_family_datasets(&layout, set, label_map)?;
    let validation = build_validation_set(
        &datasets,
        label_map,
        config.dataset.validation_tail,
        Interpolation::Cubic,
    )?;
    let inputs = validation.input_tensor()?;

    let mut scores = Array2::<f32>::zeros((validation.len(), label_map.len()));
    for entry in label_map.entries() {
        let model = backend.load(&layout.model(set, entry.family))?;
        let probabilities = model.predict(inputs.view())?;
        if probabilities.len() != validation.len() {
            return Err(FeatureError::Model(format!(
                "{} classifier returned {} probabilities for {} samples",
                entry.family,
                probabilities.len(),
                validation.len()
            )));
        }
        scores.column_mut(entry.index).assign(&probabilities);
    }

    let predicted: Vec<usize> = scores
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| {
                    if p > best.1 { (i, p) } else { best }
                })
                .0
        })
        .collect();

    write_labels(layout.true_labels(set), &validation.labels)?;
    write_labels(layout.predicted_labels(set), &predicted)?;

    let names = label_map.families().map(|f| f.to_string()).collect();
    let report = ClassificationReport::from_labels(&validation.labels, &predicted, names)?;
    info!(%set, accuracy = report.accuracy(), "validated feature set");

    Ok(ValidationOutcome {
        truth: validation.labels,
        predicted,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::InstrumentFamily;
    use crate::operations::types::RepresentationType;
    use crate::storage::{read_curve, read_labels, save_stack};
    use ndarray::{Array2, Axis};
    use std::cell::Cell;

    /// Scores a sample by how close its mean is to the family's marker value.
    struct MarkerModel {
        marker: f32,
    }

    impl BinaryClassifier for MarkerModel {
        fn predict(&self, inputs: ArrayView4<f32>) -> FeatureResult<Array1<f32>> {
            Ok(inputs
                .axis_iter(Axis(0))
                .map(|sample| {
                    let mean = sample.mean().unwrap_or(0.0);
                    1.0 / (1.0 + (mean - self.marker).abs())
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct MockBackend {
        held: Cell<bool>,
        acquisitions: usize,
        releases: usize,
        fail_fit_for_marker: Option<f32>,
    }

    impl ModelBackend for MockBackend {
        type Model = MarkerModel;

        fn acquire(&mut self) -> FeatureResult<()> {
            assert!(!self.held.get(), "context acquired twice");
            self.held.set(true);
            self.acquisitions += 1;
            Ok(())
        }

        fn release(&mut self) {
            self.held.set(false);
            self.releases += 1;
        }

        fn fit(
            &mut self,
            inputs: ArrayView4<f32>,
            labels: ArrayView1<f32>,
            _params: &TrainingParams,
        ) -> FeatureResult<(MarkerModel, TrainingHistory)> {
            assert!(self.held.get());
            let positive = labels.iter().position(|&l| l == 1.0).unwrap_or(0);
            let marker = inputs.index_axis(Axis(0), positive).mean().unwrap_or(0.0);
            if self.fail_fit_for_marker == Some(marker) {
                return Err(FeatureError::Model("fit diverged".to_string()));
            }
            let history = TrainingHistory {
                loss: vec![0.7, 0.4, marker as f64],
                accuracy: vec![0.5, 0.8, 0.9],
            };
            Ok((MarkerModel { marker }, history))
        }

        fn save(&self, model: &MarkerModel, path: &Path) -> FeatureResult<()> {
            crate::config::ensure_parent(path)?;
            std::fs::write(path, model.marker.to_string()).map_err(|e| FeatureError::io(path, e))
        }

        fn load(&self, path: &Path) -> FeatureResult<MarkerModel> {
            let text = std::fs::read_to_string(path).map_err(|e| FeatureError::io(path, e))?;
            let marker = text
                .trim()
                .parse()
                .map_err(|e| FeatureError::Model(format!("{e}")))?;
            Ok(MarkerModel { marker })
        }
    }

    fn setup(name: &str) -> (PipelineConfig, std::path::PathBuf) {
        let base = std::env::temp_dir().join(format!("multigram-model-{name}-{}", std::process::id()));
        std::fs::remove_dir_all(&base).ok();
        let mut config = PipelineConfig::new(base.join("data"), base.join("out"));
        config.dataset.training_cap = 4;
        config.dataset.validation_tail = 2;
        let layout = config.layout();
        let set = FeatureSet::Single(RepresentationType::Chroma);
        for (k, family) in InstrumentFamily::ALL.iter().enumerate() {
            let blocks = vec![Array2::from_elem((3, 2), k as f32 * 10.0); 6];
            save_stack(layout.features(*family, set), &blocks).unwrap();
        }
        (config, base)
    }

    #[test]
    fn test_scope_releases_on_error() {
        let mut backend = MockBackend::default();
        let result: FeatureResult<()> = (|| {
            let _scope = AcceleratorScope::new(&mut backend)?;
            Err(FeatureError::Model("boom".to_string()))
        })();
        assert!(result.is_err());
        assert_eq!(backend.acquisitions, 1);
        assert_eq!(backend.releases, 1);
        assert!(!backend.held.get());
    }

    #[test]
    fn test_train_then_validate() {
        let (config, base) = setup("train");
        let map = LabelMap::nsynth();
        let set = FeatureSet::Single(RepresentationType::Chroma);
        let layout = config.layout();

        let mut backend = MockBackend::default();
        let report = train_feature_set(&mut backend, &config, &map, set, ErrorHandling::CollectErrors)
            .unwrap();
        assert!(report.is_success());
        assert_eq!(backend.acquisitions, 10);
        assert_eq!(backend.releases, 10);

        let loss = read_curve(layout.loss_curve(set, InstrumentFamily::Guitar)).unwrap();
        assert_eq!(loss, vec![0.7, 0.4, 30.0]);

        let outcome = validate_feature_set(&backend, &config, &map, set).unwrap();
        assert_eq!(outcome.truth.len(), 20);
        assert_eq!(outcome.predicted, outcome.truth);
        assert_eq!(outcome.report.accuracy(), 1.0);
        assert_eq!(read_labels(layout.predicted_labels(set)).unwrap(), outcome.predicted);

        std::fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn test_failed_family_is_isolated() {
        let (config, base) = setup("isolate");
        let map = LabelMap::nsynth();
        let set = FeatureSet::Single(RepresentationType::Chroma);

        let mut backend = MockBackend {
            fail_fit_for_marker: Some(20.0),
            ..MockBackend::default()
        };
        let report = train_feature_set(&mut backend, &config, &map, set, ErrorHandling::CollectErrors)
            .unwrap();
        assert_eq!(report.completed(), 9);
        assert_eq!(report.failures()[0].family, InstrumentFamily::Flute);
        assert_eq!(backend.releases, 10);

        std::fs::remove_dir_all(&base).ok();
    }
}
