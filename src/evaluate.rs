//! Per-category classification reports for a fitted model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::metrics::MetricsCollector;
use crate::model::{Estimator, Model};

const REPORT_WIDTH: usize = 12;
const HEADERS: [&str; 4] = ["precision", "recall", "f1-score", "support"];

/// Precision, recall and F1 for one label value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: u8,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Averaged metrics over all label values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Binary classification report over the labels seen in truth or prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

/// Build a report for one output column. Zero divisions yield 0.
#[must_use]
pub fn classification_report(y_true: &[u8], y_pred: &[u8]) -> ClassificationReport {
    let labels: BTreeSet<u8> = y_true.iter().chain(y_pred).copied().collect();
    let total = y_true.len().min(y_pred.len());

    let classes: Vec<ClassMetrics> = labels
        .into_iter()
        .map(|label| {
            let mut tp = 0;
            let mut predicted = 0;
            let mut actual = 0;
            for (&t, &p) in y_true.iter().zip(y_pred) {
                if p == label {
                    predicted += 1;
                }
                if t == label {
                    actual += 1;
                    if p == label {
                        tp += 1;
                    }
                }
            }
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, actual);
            ClassMetrics {
                label,
                precision,
                recall,
                f1: f1_score(precision, recall),
                support: actual,
            }
        })
        .collect();

    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    let n_classes = classes.len().max(1) as f64;
    let support: usize = classes.iter().map(|c| c.support).sum();

    let macro_avg = AverageMetrics {
        precision: classes.iter().map(|c| c.precision).sum::<f64>() / n_classes,
        recall: classes.iter().map(|c| c.recall).sum::<f64>() / n_classes,
        f1: classes.iter().map(|c| c.f1).sum::<f64>() / n_classes,
        support,
    };

    let weighted = |metric: fn(&ClassMetrics) -> f64| {
        if support == 0 {
            0.0
        } else {
            classes.iter().map(|c| metric(c) * c.support as f64).sum::<f64>() / support as f64
        }
    };
    let weighted_avg = AverageMetrics {
        precision: weighted(|c| c.precision),
        recall: weighted(|c| c.recall),
        f1: weighted(|c| c.f1),
        support,
    };

    ClassificationReport {
        accuracy: ratio(correct, total),
        classes,
        macro_avg,
        weighted_avg,
    }
}

fn write_row(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    precision: f64,
    recall: f64,
    f1: f64,
    support: usize,
) -> fmt::Result {
    writeln!(
        f,
        "{name:>REPORT_WIDTH$}  {precision:>9.2} {recall:>9.2} {f1:>9.2} {support:>9}"
    )
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>REPORT_WIDTH$} ", "")?;
        for header in HEADERS {
            write!(f, " {header:>9}")?;
        }
        writeln!(f)?;
        writeln!(f)?;

        for class in &self.classes {
            write_row(
                f,
                &class.label.to_string(),
                class.precision,
                class.recall,
                class.f1,
                class.support,
            )?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "{:>REPORT_WIDTH$}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            write_row(f, name, avg.precision, avg.recall, avg.f1, avg.support)?;
        }
        Ok(())
    }
}

/// Fraction of rows whose every output matches
#[must_use]
pub fn subset_accuracy(y_true: &[Vec<u8>], y_pred: &[Vec<u8>]) -> f64 {
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    ratio(correct, y_true.len())
}

/// Report for a single category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: String,
    pub report: ClassificationReport,
}

/// Evaluation of a model on a held-out test set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub test_samples: usize,
    pub subset_accuracy: f64,
    /// Mean of the per-category weighted-average F1 scores
    pub mean_weighted_f1: f64,
    pub categories: Vec<CategoryReport>,
}

impl EvaluationReport {
    /// True when there was nothing to evaluate
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// Build per-category reports from truth and prediction rows
pub fn evaluate_predictions(
    y_true: &[Vec<u8>],
    y_pred: &[Vec<u8>],
    category_names: &[String],
) -> Result<EvaluationReport> {
    if y_true.len() != y_pred.len() {
        return Err(PipelineError::InvalidConfig(format!(
            "{} truth rows for {} prediction rows",
            y_true.len(),
            y_pred.len()
        )));
    }
    if let Some(row) = y_true
        .iter()
        .chain(y_pred)
        .find(|row| row.len() != category_names.len())
    {
        return Err(PipelineError::InvalidConfig(format!(
            "label row has {} values for {} categories",
            row.len(),
            category_names.len()
        )));
    }
    if y_true.is_empty() {
        return Ok(EvaluationReport::default());
    }

    let categories: Vec<CategoryReport> = category_names
        .iter()
        .enumerate()
        .map(|(column, name)| {
            let truth: Vec<u8> = y_true.iter().map(|row| row[column]).collect();
            let predicted: Vec<u8> = y_pred.iter().map(|row| row[column]).collect();
            CategoryReport {
                category: name.clone(),
                report: classification_report(&truth, &predicted),
            }
        })
        .collect();

    let mean_weighted_f1 = categories
        .iter()
        .map(|c| c.report.weighted_avg.f1)
        .sum::<f64>()
        / categories.len().max(1) as f64;

    Ok(EvaluationReport {
        test_samples: y_true.len(),
        subset_accuracy: subset_accuracy(y_true, y_pred),
        mean_weighted_f1,
        categories,
    })
}

/// Predict the test set and print a classification report per category
#[allow(clippy::print_stdout)]
pub fn evaluate_model<E: Estimator>(
    model: &Model<E>,
    x_test: &[String],
    y_test: &[Vec<u8>],
    category_names: &[String],
) -> Result<EvaluationReport> {
    if x_test.is_empty() {
        warn!("Test set is empty, skipping evaluation");
        return Ok(EvaluationReport::default());
    }

    let y_pred = model.predict(x_test)?;
    let report = evaluate_predictions(y_test, &y_pred, category_names)?;

    let metrics = MetricsCollector::default();
    for category in &report.categories {
        println!("{}", category.category);
        println!("{}", category.report);
        metrics.record_category_f1(&category.category, category.report.weighted_avg.f1);
    }

    info!(
        test_samples = report.test_samples,
        subset_accuracy = report.subset_accuracy,
        mean_weighted_f1 = report.mean_weighted_f1,
        "Evaluation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_report_matches_hand_computation() {
        let report = classification_report(&[0, 1, 1, 0], &[0, 1, 0, 0]);

        assert_eq!(report.classes.len(), 2);
        let zero = &report.classes[0];
        assert!(close(zero.precision, 2.0 / 3.0));
        assert!(close(zero.recall, 1.0));
        assert!(close(zero.f1, 0.8));
        assert_eq!(zero.support, 2);

        let one = &report.classes[1];
        assert!(close(one.precision, 1.0));
        assert!(close(one.recall, 0.5));
        assert!(close(one.f1, 2.0 / 3.0));

        assert!(close(report.accuracy, 0.75));
        assert!(close(report.macro_avg.precision, 5.0 / 6.0));
        assert!(close(report.macro_avg.f1, (0.8 + 2.0 / 3.0) / 2.0));
        assert_eq!(report.weighted_avg.support, 4);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let report = classification_report(&[1, 1], &[0, 0]);
        let zero = &report.classes[0];
        assert!(close(zero.precision, 0.0));
        assert!(close(zero.recall, 0.0));
        assert_eq!(zero.support, 0);
        assert!(close(report.accuracy, 0.0));
    }

    #[test]
    fn test_single_label_report() {
        let report = classification_report(&[0, 0, 0], &[0, 0, 0]);
        assert_eq!(report.classes.len(), 1);
        assert!(close(report.weighted_avg.f1, 1.0));
    }

    #[test]
    fn test_report_layout() {
        let text = classification_report(&[0, 1, 1, 0], &[0, 1, 0, 0]).to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "              precision    recall  f1-score   support");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "           0       0.67      1.00      0.80         2");
        assert_eq!(lines[3], "           1       1.00      0.50      0.67         2");
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "    accuracy                           0.75         4");
        assert_eq!(lines[6], "   macro avg       0.83      0.75      0.73         4");
        assert_eq!(lines[7], "weighted avg       0.83      0.75      0.73         4");
    }

    #[test]
    fn test_subset_accuracy() {
        let truth = vec![vec![1, 0], vec![0, 1], vec![1, 1]];
        let pred = vec![vec![1, 0], vec![0, 0], vec![1, 1]];
        assert!(close(subset_accuracy(&truth, &pred), 2.0 / 3.0));
        assert!(close(subset_accuracy(&[], &[]), 0.0));
    }

    #[test]
    fn test_evaluate_predictions_per_category() {
        let names = vec!["related".to_string(), "request".to_string()];
        let truth = vec![vec![1, 0], vec![1, 1]];
        let pred = vec![vec![1, 0], vec![1, 0]];

        let report = evaluate_predictions(&truth, &pred, &names).expect("Failed to evaluate");
        assert_eq!(report.categories.len(), 2);
        assert_eq!(report.categories[1].category, "request");
        assert!(close(report.subset_accuracy, 0.5));
        assert!(close(report.categories[0].report.accuracy, 1.0));
    }

    #[test]
    fn test_evaluate_predictions_rejects_width_mismatch() {
        let names = vec!["related".to_string()];
        assert!(evaluate_predictions(&[vec![1, 0]], &[vec![1, 0]], &names).is_err());
    }
}
