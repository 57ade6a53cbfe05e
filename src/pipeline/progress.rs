//! Progress reporting for stage drivers.
//!
//! Stages report one step per family/feature iteration. Without the
//! `progress-tracking` feature progress goes to the log; with it an
//! indicatif bar is drawn.

#[cfg(feature = "progress-tracking")]
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Receives progress events from a stage.
pub trait ProgressReporter {
    /// A stage with `total` iterations is starting.
    fn start(&self, stage: &str, total: usize);

    /// One iteration finished.
    fn advance(&self, label: &str);

    /// The stage is done.
    fn finish(&self) {}
}

/// Discards all progress events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&self, _stage: &str, _total: usize) {}

    fn advance(&self, _label: &str) {}
}

/// Logs each step at `info` level.
#[derive(Debug, Default)]
pub struct LogProgress {
    done: std::cell::Cell<usize>,
    total: std::cell::Cell<usize>,
}

impl ProgressReporter for LogProgress {
    fn start(&self, stage: &str, total: usize) {
        self.done.set(0);
        self.total.set(total);
        info!(stage, total, "stage started");
    }

    fn advance(&self, label: &str) {
        let done = self.done.get() + 1;
        self.done.set(done);
        info!(step = done, total = self.total.get(), label, "step done");
    }
}

/// Progress bar reporter using indicatif.
#[cfg(feature = "progress-tracking")]
#[derive(Debug)]
pub struct ProgressBarReporter {
    bar: ProgressBar,
}

#[cfg(feature = "progress-tracking")]
impl ProgressBarReporter {
    /// Creates a hidden bar; it is sized when the stage starts.
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

#[cfg(feature = "progress-tracking")]
impl Default for ProgressBarReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "progress-tracking")]
impl ProgressReporter for ProgressBarReporter {
    fn start(&self, stage: &str, total: usize) {
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_prefix(stage.to_string());
    }

    fn advance(&self, label: &str) {
        self.bar.set_message(label.to_string());
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

/// The reporter used by the command-line driver.
pub fn default_reporter() -> Box<dyn ProgressReporter> {
    #[cfg(feature = "progress-tracking")]
    {
        Box::new(ProgressBarReporter::new())
    }
    #[cfg(not(feature = "progress-tracking"))]
    {
        Box::new(LogProgress::default())
    }
}
