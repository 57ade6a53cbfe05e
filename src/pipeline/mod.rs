//! Stage drivers for feature extraction and combination.
//!
//! Every driver iterates family × feature, persists each result before moving
//! on, and isolates faults: a failing iteration is logged and recorded in a
//! [`StageReport`] instead of aborting the whole run (unless
//! [`ErrorHandling::StopOnFirstError`] is requested).

pub mod progress;

#[cfg(test)]
mod tests;

use std::fmt;

use tracing::{error, info, warn};

use crate::audio::{AudioClip, load_family_clips};
use crate::config::PipelineConfig;
use crate::family::InstrumentFamily;
use crate::operations::combine::combine;
use crate::operations::extract::FeatureExtractor;
use crate::operations::types::{FeatureSet, RepresentationType};
use crate::storage::{load_stack, save_stack};
use crate::{FeatureBlock, FeatureError, FeatureResult};

pub use progress::{LogProgress, NoProgress, ProgressReporter, default_reporter};

/// How a stage reacts to a failing iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorHandling {
    /// Abort the stage with the first error.
    StopOnFirstError,
    /// Log the error, record it and continue with the next iteration.
    #[default]
    CollectErrors,
}

/// A failed family/feature iteration.
#[derive(Debug)]
pub struct StageFailure {
    /// Family being processed.
    pub family: InstrumentFamily,
    /// Feature (or artifact) name being processed.
    pub feature: String,
    /// What went wrong.
    pub error: FeatureError,
}

/// Outcome of one stage run.
#[derive(Debug)]
pub struct StageReport {
    stage: String,
    completed: usize,
    failures: Vec<StageFailure>,
}

impl StageReport {
    /// Empty report for the named stage.
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            completed: 0,
            failures: Vec::new(),
        }
    }

    /// Stage name.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Iterations that finished successfully.
    pub const fn completed(&self) -> usize {
        self.completed
    }

    /// Iterations that failed.
    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }

    /// Returns true when no iteration failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Records the outcome of one iteration.
    ///
    /// Under `StopOnFirstError` a failure is returned wrapped in
    /// [`FeatureError::Stage`]; otherwise it is logged and kept.
    pub fn record<T>(
        &mut self,
        family: InstrumentFamily,
        feature: &str,
        result: FeatureResult<T>,
        handling: ErrorHandling,
    ) -> FeatureResult<Option<T>> {
        match result {
            Ok(value) => {
                self.completed += 1;
                Ok(Some(value))
            }
            Err(err) => {
                error!(stage = %self.stage, %family, feature, error = %err, "iteration failed");
                match handling {
                    ErrorHandling::StopOnFirstError => {
                        Err(FeatureError::stage(family.name(), feature, err))
                    }
                    ErrorHandling::CollectErrors => {
                        self.failures.push(StageFailure {
                            family,
                            feature: feature.to_string(),
                            error: err,
                        });
                        Ok(None)
                    }
                }
            }
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} completed, {} failed",
            self.stage,
            self.completed,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  {}/{}: {}",
                failure.family, failure.feature, failure.error
            )?;
        }
        Ok(())
    }
}

/// Extracts one representation for every clip of a family.
pub fn extract_family(
    extractor: &FeatureExtractor,
    clips: &[AudioClip],
    kind: RepresentationType,
) -> FeatureResult<Vec<FeatureBlock>> {
    clips
        .iter()
        .map(|clip| extractor.extract_clip(clip, kind))
        .collect()
}

/// Zips six per-type stacks (canonical order) sample by sample into combined blocks.
pub fn combine_family(
    stacks: &[Vec<FeatureBlock>],
    padding_rows: usize,
) -> FeatureResult<Vec<FeatureBlock>> {
    if stacks.len() != RepresentationType::ALL.len() {
        return Err(FeatureError::InvalidParameter(format!(
            "expected {} feature stacks, got {}",
            RepresentationType::ALL.len(),
            stacks.len()
        )));
    }
    let samples = stacks[0].len();
    if let Some((kind, stack)) = RepresentationType::ALL
        .iter()
        .zip(stacks)
        .find(|(_, stack)| stack.len() != samples)
    {
        return Err(FeatureError::InvalidParameter(format!(
            "{kind} stack holds {} samples, expected {samples}",
            stack.len()
        )));
    }

    (0..samples)
        .map(|i| {
            let blocks: Vec<FeatureBlock> = stacks.iter().map(|stack| stack[i].clone()).collect();
            combine(&blocks, padding_rows)
        })
        .collect()
}

/// Extracts and combines in memory, one combined block per clip.
pub fn combine_clips(
    extractor: &FeatureExtractor,
    clips: &[AudioClip],
    padding_rows: usize,
) -> FeatureResult<Vec<FeatureBlock>> {
    clips
        .iter()
        .map(|clip| combine(&extractor.extract_all(clip)?, padding_rows))
        .collect()
}

/// Stage 2: extracts every representation for every family and persists it.
pub fn run_extraction(
    config: &PipelineConfig,
    families: &[InstrumentFamily],
    handling: ErrorHandling,
    progress: &dyn ProgressReporter,
) -> FeatureResult<StageReport> {
    let layout = config.layout();
    let extractor = FeatureExtractor::new(config.extraction.clone())?;
    let mut report = StageReport::new("extract");
    progress.start("extract", families.len() * RepresentationType::ALL.len());

    for &family in families {
        let loaded = load_family_clips(&layout, family, config.extraction.sample_rate);
        let Some(clips) = report.record(family, "waveform", loaded, handling)? else {
            for kind in RepresentationType::ALL {
                progress.advance(&format!("{family}/{kind} skipped"));
            }
            continue;
        };
        info!(%family, clips = clips.len(), "extracting features");

        for kind in RepresentationType::ALL {
            let path = layout.features(family, FeatureSet::Single(kind));
            let result = extract_family(&extractor, &clips, kind)
                .and_then(|blocks| save_stack(&path, &blocks));
            report.record(family, kind.name(), result, handling)?;
            progress.advance(&format!("{family}/{kind}"));
        }
    }

    progress.finish();
    log_report(&report);
    Ok(report)
}

/// Stage 3: combines the six persisted stacks of every family.
pub fn run_combination(
    config: &PipelineConfig,
    families: &[InstrumentFamily],
    handling: ErrorHandling,
    progress: &dyn ProgressReporter,
) -> FeatureResult<StageReport> {
    let layout = config.layout();
    let mut report = StageReport::new("combine");
    progress.start("combine", families.len());

    for &family in families {
        let result = RepresentationType::ALL
            .iter()
            .map(|&kind| load_stack(layout.features(family, FeatureSet::Single(kind))))
            .collect::<FeatureResult<Vec<_>>>()
            .and_then(|stacks| combine_family(&stacks, config.dataset.padding_rows))
            .and_then(|combined| {
                info!(%family, samples = combined.len(), "storing combined blocks");
                save_stack(layout.features(family, FeatureSet::Combined), &combined)
            });
        report.record(family, FeatureSet::COMBINED_NAME, result, handling)?;
        progress.advance(family.name());
    }

    progress.finish();
    log_report(&report);
    Ok(report)
}

fn log_report(report: &StageReport) {
    if report.is_success() {
        info!(stage = report.stage(), completed = report.completed(), "stage finished");
    } else {
        warn!(
            stage = report.stage(),
            completed = report.completed(),
            failed = report.failures().len(),
            "stage finished with failures"
        );
    }
}
