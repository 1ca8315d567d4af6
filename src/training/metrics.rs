//! Per-class classification metrics

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TunerError};

/// Precision, recall, f1 and support for one class (or an average)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Text report over all classes, laid out like the usual two-digit table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub digits: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ClassificationReport {
    /// Build the report from true and predicted class indices
    ///
    /// Ill-defined precision or recall (no predicted / no true samples)
    /// counts as 0.
    pub fn new(y_true: &[usize], y_pred: &[usize], label_names: &[&str]) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(TunerError::ShapeError {
                expected: format!("{} predictions", y_true.len()),
                actual: y_pred.len().to_string(),
            });
        }
        let n_classes = label_names.len();
        if let Some(&bad) = y_true.iter().chain(y_pred).find(|&&c| c >= n_classes) {
            return Err(TunerError::InvalidParameter {
                name: "label".to_string(),
                value: bad.to_string(),
                reason: format!("only {} label names given", n_classes),
            });
        }

        let mut tp = vec![0usize; n_classes];
        let mut predicted = vec![0usize; n_classes];
        let mut support = vec![0usize; n_classes];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            support[t] += 1;
            predicted[p] += 1;
            if t == p {
                tp[t] += 1;
            }
        }

        let classes: Vec<ClassMetrics> = (0..n_classes)
            .map(|c| {
                let precision = ratio(tp[c], predicted[c]);
                let recall = ratio(tp[c], support[c]);
                let f1_score = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: label_names[c].to_string(),
                    precision,
                    recall,
                    f1_score,
                    support: support[c],
                }
            })
            .collect();

        let total = y_true.len();
        let accuracy = ratio(tp.iter().sum(), total);

        let average = |label: &str, weight: &dyn Fn(&ClassMetrics) -> f64| {
            let norm: f64 = classes.iter().map(weight).sum();
            let avg = |f: fn(&ClassMetrics) -> f64| {
                if norm == 0.0 {
                    0.0
                } else {
                    classes.iter().map(|c| f(c) * weight(c)).sum::<f64>() / norm
                }
            };
            ClassMetrics {
                label: label.to_string(),
                precision: avg(|c| c.precision),
                recall: avg(|c| c.recall),
                f1_score: avg(|c| c.f1_score),
                support: total,
            }
        };
        let macro_avg = average("macro avg", &|_: &ClassMetrics| 1.0);
        let weighted_avg = average("weighted avg", &|c: &ClassMetrics| c.support as f64);

        Ok(Self {
            classes,
            accuracy,
            macro_avg,
            weighted_avg,
            digits: 2,
        })
    }

    pub fn with_digits(mut self, digits: usize) -> Self {
        self.digits = digits;
        self
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.len())
            .chain([self.weighted_avg.label.len(), self.digits])
            .max()
            .unwrap_or(0);
        let d = self.digits;

        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;

        let row = |f: &mut fmt::Formatter<'_>, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>width$}  {:>9.d$} {:>9.d$} {:>9.d$} {:>9}",
                m.label, m.precision, m.recall, m.f1_score, m.support
            )
        };
        for class in &self.classes {
            row(f, class)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9.d$} {:>9}",
            "accuracy", "", "", self.accuracy, self.weighted_avg.support
        )?;
        row(f, &self.macro_avg)?;
        row(f, &self.weighted_avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: [&str; 3] = ["cat", "dog", "bird"];

    #[test]
    fn test_known_confusion() {
        // cat: 2 of 3 right, dog: 1 of 1, bird: 0 of 1 (predicted as dog)
        let y_true = [0, 0, 0, 1, 2];
        let y_pred = [0, 0, 1, 1, 1];
        let report = ClassificationReport::new(&y_true, &y_pred, &NAMES).unwrap();

        let cat = &report.classes[0];
        assert!((cat.precision - 1.0).abs() < 1e-12);
        assert!((cat.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((cat.f1_score - 0.8).abs() < 1e-12);
        assert_eq!(cat.support, 3);

        let dog = &report.classes[1];
        assert!((dog.precision - 1.0 / 3.0).abs() < 1e-12);
        assert!((dog.recall - 1.0).abs() < 1e-12);
        assert!((dog.f1_score - 0.5).abs() < 1e-12);

        let bird = &report.classes[2];
        assert_eq!(bird.precision, 0.0);
        assert_eq!(bird.f1_score, 0.0);

        assert!((report.accuracy - 0.6).abs() < 1e-12);
        assert!((report.macro_avg.f1_score - 1.3 / 3.0).abs() < 1e-12);
        assert!((report.weighted_avg.recall - 0.6).abs() < 1e-12);
        assert_eq!(report.weighted_avg.support, 5);
    }

    #[test]
    fn test_display_layout() {
        let report = ClassificationReport::new(&[0, 1, 2], &[0, 1, 2], &NAMES).unwrap();
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "              precision    recall  f1-score   support");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "         cat       1.00      1.00      1.00         1");
        assert!(lines[6].starts_with("    accuracy"));
        assert!(lines[6].ends_with("1.00         3"));
        assert!(lines[8].starts_with("weighted avg"));
    }

    #[test]
    fn test_rejects_unknown_label() {
        assert!(ClassificationReport::new(&[0, 5], &[0, 1], &NAMES).is_err());
        assert!(ClassificationReport::new(&[0], &[0, 1], &NAMES).is_err());
    }
}
