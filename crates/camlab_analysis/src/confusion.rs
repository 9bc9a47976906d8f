//! Confusion matrix computation.

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Confusion matrix for classification evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// The matrix values (row = true, col = pred).
    pub matrix: Vec<Vec<usize>>,
    /// Number of classes.
    pub n_classes: usize,
    /// Class labels.
    pub labels: Option<Vec<String>>,
}

impl ConfusionMatrix {
    /// Create a new confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            matrix: vec![vec![0; n_classes]; n_classes],
            n_classes,
            labels: None,
        }
    }

    /// Set class labels.
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Add a prediction. Pairs outside the matrix are ignored.
    pub fn add(&mut self, true_class: usize, pred_class: usize) {
        if true_class < self.n_classes && pred_class < self.n_classes {
            self.matrix[true_class][pred_class] += 1;
        }
    }

    /// Total number of recorded pairs.
    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    /// Get accuracy.
    pub fn accuracy(&self) -> f32 {
        let correct: usize = (0..self.n_classes).map(|i| self.matrix[i][i]).sum();
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            correct as f32 / total as f32
        }
    }

    /// Normalize the matrix row-wise, so the diagonal shows recall.
    pub fn normalize(&self) -> Vec<Vec<f32>> {
        self.matrix
            .iter()
            .map(|row| {
                let sum: usize = row.iter().sum();
                if sum == 0 {
                    vec![0.0; self.n_classes]
                } else {
                    row.iter().map(|&v| v as f32 / sum as f32).collect()
                }
            })
            .collect()
    }

    /// Get a text representation.
    pub fn to_string_table(&self) -> String {
        let label = |i: usize| -> String {
            self.labels
                .as_ref()
                .and_then(|l| l.get(i).cloned())
                .unwrap_or_else(|| i.to_string())
        };

        let mut s = String::from("       ");
        for j in 0..self.n_classes {
            s.push_str(&format!("{:>8}", label(j).chars().take(7).collect::<String>()));
        }
        s.push('\n');

        for i in 0..self.n_classes {
            s.push_str(&format!("{:>6} ", label(i).chars().take(6).collect::<String>()));
            for j in 0..self.n_classes {
                s.push_str(&format!("{:>8}", self.matrix[i][j]));
            }
            s.push('\n');
        }

        s
    }
}

/// Compute a confusion matrix from predictions and targets.
///
/// The matrix is sized to hold the largest label seen, or `n_classes`
/// when that is larger.
///
/// # Errors
///
/// Returns an error if the slices differ in length.
pub fn confusion_matrix(
    predictions: &[usize],
    targets: &[usize],
    n_classes: Option<usize>,
) -> Result<ConfusionMatrix> {
    if predictions.len() != targets.len() {
        return Err(AnalysisError::LengthMismatch {
            predictions: predictions.len(),
            targets: targets.len(),
        });
    }

    let observed = predictions
        .iter()
        .chain(targets)
        .max()
        .map_or(0, |max| max + 1);
    let mut cm = ConfusionMatrix::new(observed.max(n_classes.unwrap_or(0)));

    for (&pred, &target) in predictions.iter().zip(targets) {
        cm.add(target, pred);
    }

    Ok(cm)
}
