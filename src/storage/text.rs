//! Newline-delimited text files for metric curves and label lists.

use std::fmt::Write as _;
use std::path::Path;

use crate::config::ensure_parent;
use crate::{FeatureError, FeatureResult};

/// Writes one decimal value per line, in the given order.
pub fn write_curve<P: AsRef<Path>>(path: P, values: &[f64]) -> FeatureResult<()> {
    let mut text = String::with_capacity(values.len() * 12);
    for value in values {
        let _ = writeln!(text, "{value}");
    }
    write_text(path.as_ref(), &text)
}

/// Reads a curve written by [`write_curve`]. Blank lines are ignored.
pub fn read_curve<P: AsRef<Path>>(path: P) -> FeatureResult<Vec<f64>> {
    parse_lines(path.as_ref(), |s| s.parse::<f64>().map_err(|e| e.to_string()))
}

/// Writes one integer label per line.
pub fn write_labels<P: AsRef<Path>>(path: P, labels: &[usize]) -> FeatureResult<()> {
    let mut text = String::with_capacity(labels.len() * 3);
    for label in labels {
        let _ = writeln!(text, "{label}");
    }
    write_text(path.as_ref(), &text)
}

/// Reads a label file written by [`write_labels`].
pub fn read_labels<P: AsRef<Path>>(path: P) -> FeatureResult<Vec<usize>> {
    parse_lines(path.as_ref(), |s| s.parse::<usize>().map_err(|e| e.to_string()))
}

fn write_text(path: &Path, text: &str) -> FeatureResult<()> {
    ensure_parent(path)?;
    std::fs::write(path, text).map_err(|e| FeatureError::io(path, e))
}

fn parse_lines<T>(
    path: &Path,
    parse: impl Fn(&str) -> Result<T, String>,
) -> FeatureResult<Vec<T>> {
    let text = std::fs::read_to_string(path).map_err(|e| FeatureError::io(path, e))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            parse(line.trim()).map_err(|e| {
                FeatureError::Format(format!("{}:{}: {e}", path.display(), number + 1))
            })
        })
        .collect()
}
