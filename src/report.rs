//! Multi-class classification metrics.

use std::fmt;

use ndarray::Array2;

use crate::{FeatureError, FeatureResult};

/// Precision, recall, F1 and support of one class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics {
    /// Correct predictions over all predictions of the class.
    pub precision: f64,
    /// Correct predictions over all samples of the class.
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
    /// Number of samples whose true label is the class.
    pub support: usize,
}

/// Per-class metrics, averages and the confusion matrix.
///
/// Ratios with a zero denominator are reported as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    names: Vec<String>,
    per_class: Vec<ClassMetrics>,
    confusion: Array2<usize>,
    accuracy: f64,
}

impl ClassificationReport {
    /// Computes the report from parallel true and predicted label lists.
    ///
    /// Labels must be dense indices below `names.len()`.
    pub fn from_labels(
        truth: &[usize],
        predicted: &[usize],
        names: Vec<String>,
    ) -> FeatureResult<Self> {
        if truth.len() != predicted.len() {
            return Err(FeatureError::InvalidParameter(format!(
                "{} true labels but {} predictions",
                truth.len(),
                predicted.len()
            )));
        }
        let classes = names.len();
        if let Some(bad) = truth.iter().chain(predicted).find(|&&l| l >= classes) {
            return Err(FeatureError::InvalidParameter(format!(
                "label {bad} outside 0..{classes}"
            )));
        }

        let mut confusion = Array2::<usize>::zeros((classes, classes));
        for (&t, &p) in truth.iter().zip(predicted) {
            confusion[[t, p]] += 1;
        }

        let per_class = (0..classes)
            .map(|c| {
                let tp = confusion[[c, c]] as f64;
                let predicted_c = confusion.column(c).sum() as f64;
                let support = confusion.row(c).sum();
                let precision = ratio(tp, predicted_c);
                let recall = ratio(tp, support as f64);
                ClassMetrics {
                    precision,
                    recall,
                    f1: ratio(2.0 * precision * recall, precision + recall),
                    support,
                }
            })
            .collect();

        let correct: usize = (0..classes).map(|c| confusion[[c, c]]).sum();
        Ok(Self {
            names,
            per_class,
            confusion,
            accuracy: ratio(correct as f64, truth.len() as f64),
        })
    }

    /// Class names in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Metrics of each class in index order.
    pub fn per_class(&self) -> &[ClassMetrics] {
        &self.per_class
    }

    /// `confusion[[true, predicted]]` counts.
    pub fn confusion(&self) -> &Array2<usize> {
        &self.confusion
    }

    /// Fraction of correct predictions.
    pub const fn accuracy(&self) -> f64 {
        self.accuracy
    }

    /// Total number of samples.
    pub fn support(&self) -> usize {
        self.per_class.iter().map(|m| m.support).sum()
    }

    /// Unweighted mean over classes.
    pub fn macro_avg(&self) -> ClassMetrics {
        let n = self.per_class.len() as f64;
        self.average(|_| 1.0 / n)
    }

    /// Mean over classes weighted by support.
    pub fn weighted_avg(&self) -> ClassMetrics {
        let total = self.support() as f64;
        self.average(|m| ratio(m.support as f64, total))
    }

    fn average(&self, weight: impl Fn(&ClassMetrics) -> f64) -> ClassMetrics {
        let mut avg = ClassMetrics {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            support: self.support(),
        };
        for m in &self.per_class {
            let w = weight(m);
            avg.precision += w * m.precision;
            avg.recall += w * m.recall;
            avg.f1 += w * m.f1;
        }
        avg
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .names
            .iter()
            .map(String::len)
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, m) in self.names.iter().zip(&self.per_class) {
            writeln!(
                f,
                "{name:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.support()
        )?;
        for (label, m) in [("macro avg", self.macro_avg()), ("weighted avg", self.weighted_avg())] {
            writeln!(
                f,
                "{label:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.precision, m.recall, m.f1, m.support
            )?;
        }

        writeln!(f)?;
        writeln!(f, "confusion matrix (rows: true, columns: predicted)")?;
        for row in self.confusion.rows() {
            let cells: Vec<String> = row.iter().map(|c| format!("{c:>4}")).collect();
            writeln!(f, "{}", cells.join(""))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx_eq::assert_approx_eq;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("class{i}")).collect()
    }

    #[test]
    fn test_metrics() {
        let truth = [0, 0, 0, 1, 1, 2];
        let predicted = [0, 0, 1, 1, 0, 1];
        let report = ClassificationReport::from_labels(&truth, &predicted, names(3)).unwrap();

        let m0 = report.per_class()[0];
        assert_approx_eq!(m0.precision, 2.0 / 3.0, 1e-12);
        assert_approx_eq!(m0.recall, 2.0 / 3.0, 1e-12);
        assert_eq!(m0.support, 3);

        // class 2 is never predicted
        let m2 = report.per_class()[2];
        assert_eq!(m2.precision, 0.0);
        assert_eq!(m2.f1, 0.0);

        assert_approx_eq!(report.accuracy(), 0.5, 1e-12);
        assert_eq!(report.confusion()[[1, 0]], 1);
        assert_eq!(report.confusion()[[2, 1]], 1);

        let weighted = report.weighted_avg();
        assert_approx_eq!(weighted.recall, 0.5, 1e-12);
        assert_eq!(weighted.support, 6);
    }

    #[test]
    fn test_display_lists_every_class() {
        let report = ClassificationReport::from_labels(&[0, 1], &[0, 1], names(2)).unwrap();
        let text = report.to_string();
        assert!(text.contains("class0"));
        assert!(text.contains("weighted avg"));
        assert!(text.contains("confusion matrix"));
    }

    #[test]
    fn test_rejects_bad_labels() {
        assert!(ClassificationReport::from_labels(&[0], &[0, 1], names(2)).is_err());
        assert!(ClassificationReport::from_labels(&[3], &[0], names(2)).is_err());
    }
}
