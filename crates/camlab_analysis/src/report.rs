//! Classification report with per-class metrics.
//!
//! Provides precision, recall and F1-score for each class, along with
//! accuracy and macro and weighted averages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Per-class classification metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Class label (index).
    pub class: usize,
    /// Class name (if provided).
    pub name: Option<String>,
    /// Precision: TP / (TP + FP)
    pub precision: f32,
    /// Recall: TP / (TP + FN)
    pub recall: f32,
    /// F1-Score: 2 * (precision * recall) / (precision + recall)
    pub f1_score: f32,
    /// Support: number of true instances of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Row label: the class name when known, else the class index.
    #[must_use]
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.class.to_string())
    }
}

/// Classification report with per-class and aggregate metrics.
///
/// Rows cover every label that appears in either the targets or the
/// predictions, in ascending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Per-class metrics.
    pub classes: Vec<ClassMetrics>,
    /// Overall accuracy.
    pub accuracy: f32,
    /// Macro-averaged precision (unweighted mean over all rows).
    pub macro_precision: f32,
    /// Macro-averaged recall.
    pub macro_recall: f32,
    /// Macro-averaged F1.
    pub macro_f1: f32,
    /// Weighted-averaged precision (weighted by support).
    pub weighted_precision: f32,
    /// Weighted-averaged recall.
    pub weighted_recall: f32,
    /// Weighted-averaged F1.
    pub weighted_f1: f32,
    /// Total number of samples.
    pub total_samples: usize,
}

impl ClassificationReport {
    /// Metrics row for `class`, if the label was observed.
    #[must_use]
    pub fn class(&self, class: usize) -> Option<&ClassMetrics> {
        self.classes.iter().find(|c| c.class == class)
    }

    /// Attach names (indexed by class label) to the rows.
    #[must_use]
    pub fn with_class_names(mut self, names: &[String]) -> Self {
        for class in &mut self.classes {
            class.name = names.get(class.class).cloned();
        }
        self
    }

    /// Render the report as a text table with `digits` decimals.
    #[must_use]
    pub fn to_string_table(&self, digits: usize) -> String {
        const HEADERS: [&str; 4] = ["precision", "recall", "f1-score", "support"];
        let last_line = "weighted avg";
        let width = self
            .classes
            .iter()
            .map(|c| c.label().len())
            .chain(std::iter::once(last_line.len()))
            .max()
            .unwrap_or(last_line.len());
        let col = digits.max(HEADERS[0].len());

        let mut output = format!("{:>width$} ", "", width = width);
        for header in HEADERS {
            output.push_str(&format!(" {:>col$}", header, col = col));
        }
        output.push_str("\n\n");

        let row = |label: &str, p: f32, r: f32, f: f32, support: usize| {
            format!(
                "{:>width$}  {:>col$.d$} {:>col$.d$} {:>col$.d$} {:>col$}\n",
                label,
                p,
                r,
                f,
                support,
                width = width,
                col = col,
                d = digits
            )
        };

        for class in &self.classes {
            output.push_str(&row(
                &class.label(),
                class.precision,
                class.recall,
                class.f1_score,
                class.support,
            ));
        }

        output.push('\n');
        output.push_str(&format!(
            "{:>width$}  {:>col$} {:>col$} {:>col$.d$} {:>col$}\n",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_samples,
            width = width,
            col = col,
            d = digits
        ));
        output.push_str(&row(
            "macro avg",
            self.macro_precision,
            self.macro_recall,
            self.macro_f1,
            self.total_samples,
        ));
        output.push_str(&row(
            last_line,
            self.weighted_precision,
            self.weighted_recall,
            self.weighted_f1,
            self.total_samples,
        ));

        output
    }

    /// Get the class with lowest F1-score (worst performing).
    #[must_use]
    pub fn worst_class(&self) -> Option<&ClassMetrics> {
        self.classes
            .iter()
            .filter(|c| c.support > 0)
            .min_by(|a, b| a.f1_score.total_cmp(&b.f1_score))
    }

    /// Get the class with highest F1-score (best performing).
    #[must_use]
    pub fn best_class(&self) -> Option<&ClassMetrics> {
        self.classes
            .iter()
            .filter(|c| c.support > 0)
            .max_by(|a, b| a.f1_score.total_cmp(&b.f1_score))
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_table(f.precision().unwrap_or(3)))
    }
}

#[derive(Default, Clone, Copy)]
struct Counts {
    tp: usize,
    fp: usize,
    fn_: usize,
    support: usize,
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

/// Compute a classification report from predictions and targets.
///
/// # Arguments
///
/// * `predictions` - Predicted class labels
/// * `targets` - True class labels
/// * `class_names` - Optional names indexed by class label
///
/// # Errors
///
/// Returns an error if the slices differ in length.
///
/// # Example
///
/// ```rust
/// use camlab_analysis::classification_report;
///
/// let predictions = vec![0, 1, 2, 0, 1, 2];
/// let targets = vec![0, 1, 1, 0, 2, 2];
///
/// let report = classification_report(&predictions, &targets, None).unwrap();
/// println!("{}", report);
/// ```
pub fn classification_report(
    predictions: &[usize],
    targets: &[usize],
    class_names: Option<&[String]>,
) -> Result<ClassificationReport> {
    let n = predictions.len();
    if targets.len() != n {
        return Err(AnalysisError::LengthMismatch {
            predictions: n,
            targets: targets.len(),
        });
    }

    let mut counts: BTreeMap<usize, Counts> = predictions
        .iter()
        .chain(targets)
        .map(|&class| (class, Counts::default()))
        .collect();

    let mut correct = 0;
    for (&pred, &target) in predictions.iter().zip(targets) {
        counts.entry(target).or_default().support += 1;
        if pred == target {
            counts.entry(pred).or_default().tp += 1;
            correct += 1;
        } else {
            counts.entry(pred).or_default().fp += 1;
            counts.entry(target).or_default().fn_ += 1;
        }
    }

    let classes: Vec<ClassMetrics> = counts
        .into_iter()
        .map(|(class, c)| {
            let precision = ratio(c.tp, c.tp + c.fp);
            let recall = ratio(c.tp, c.tp + c.fn_);
            let f1_score = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                class,
                name: class_names.and_then(|names| names.get(class)).cloned(),
                precision,
                recall,
                f1_score,
                support: c.support,
            }
        })
        .collect();

    let n_classes = classes.len();
    let macro_avg = |metric: fn(&ClassMetrics) -> f32| -> f32 {
        if n_classes == 0 {
            0.0
        } else {
            classes.iter().map(metric).sum::<f32>() / n_classes as f32
        }
    };
    let weighted_avg = |metric: fn(&ClassMetrics) -> f32| -> f32 {
        if n == 0 {
            0.0
        } else {
            classes
                .iter()
                .map(|c| metric(c) * c.support as f32)
                .sum::<f32>()
                / n as f32
        }
    };

    Ok(ClassificationReport {
        macro_precision: macro_avg(|c| c.precision),
        macro_recall: macro_avg(|c| c.recall),
        macro_f1: macro_avg(|c| c.f1_score),
        weighted_precision: weighted_avg(|c| c.precision),
        weighted_recall: weighted_avg(|c| c.recall),
        weighted_f1: weighted_avg(|c| c.f1_score),
        accuracy: ratio(correct, n),
        total_samples: n,
        classes,
    })
}
