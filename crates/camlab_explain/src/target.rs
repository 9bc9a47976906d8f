//! Which class score a saliency map explains.

use burn::prelude::*;
use burn::tensor::activation::softmax;
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

/// Output a target reads from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Raw class score.
    #[default]
    Logit,
    /// Softmax probability of the class.
    Softmax,
}

/// A single class to explain for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSpec {
    /// Raw logit of the class.
    Logit(usize),
    /// Softmax probability of the class.
    Softmax(usize),
}

impl TargetSpec {
    /// Build a target of the given kind.
    pub fn new(kind: TargetKind, class: usize) -> Self {
        match kind {
            TargetKind::Logit => Self::Logit(class),
            TargetKind::Softmax => Self::Softmax(class),
        }
    }

    /// Class index this target reads.
    pub fn class(&self) -> usize {
        match self {
            Self::Logit(c) | Self::Softmax(c) => *c,
        }
    }

    /// Output this target reads.
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Logit(_) => TargetKind::Logit,
            Self::Softmax(_) => TargetKind::Softmax,
        }
    }

    /// Score of this target for one row of logits.
    pub fn score_row(&self, logits: &[f32]) -> f32 {
        let class = self.class();
        match self {
            Self::Logit(_) => logits[class],
            Self::Softmax(_) => {
                let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let denom: f32 = logits.iter().map(|v| (v - max).exp()).sum();
                (logits[class] - max).exp() / denom
            }
        }
    }

    fn check(&self, n_classes: usize) -> Result<()> {
        if self.class() >= n_classes {
            return Err(ExplainError::TargetOutOfRange {
                class: self.class(),
                n_classes,
            });
        }
        Ok(())
    }
}

/// How targets are chosen for a batch of samples.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelection {
    /// Logit of the predicted class of each sample.
    #[default]
    Predicted,
    /// One target per sample, or a single target applied to every sample.
    PerSample(Vec<TargetSpec>),
    /// One independent pass per class index.
    AllClasses(TargetKind),
}

impl TargetSelection {
    /// Explain `class` for every sample.
    pub fn class(spec: TargetSpec) -> Self {
        Self::PerSample(vec![spec])
    }

    /// Check the selection against the inputs and the model outputs.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::TargetCountMismatch`] when the number of
    /// per-sample targets is neither 1 nor `n_samples`, and
    /// [`ExplainError::TargetOutOfRange`] for a class the model does not have.
    pub fn validate(&self, n_samples: usize, n_classes: usize) -> Result<()> {
        match self {
            Self::Predicted => Ok(()),
            Self::PerSample(specs) => {
                if specs.len() != 1 && specs.len() != n_samples {
                    return Err(ExplainError::TargetCountMismatch {
                        expected: n_samples,
                        got: specs.len(),
                    });
                }
                specs.iter().try_for_each(|spec| spec.check(n_classes))
            }
            Self::AllClasses(_) => {
                if n_classes == 0 {
                    return Err(ExplainError::InvalidOption(
                        "model has no output classes".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Expand into passes, each holding one target per sample.
    ///
    /// `predicted` is only called for [`TargetSelection::Predicted`].
    pub(crate) fn passes<F>(
        &self,
        n_samples: usize,
        n_classes: usize,
        predicted: F,
    ) -> Result<Vec<Vec<TargetSpec>>>
    where
        F: FnOnce() -> Result<Vec<usize>>,
    {
        self.validate(n_samples, n_classes)?;
        let passes = match self {
            Self::Predicted => vec![predicted()?.into_iter().map(TargetSpec::Logit).collect()],
            Self::PerSample(specs) if specs.len() == 1 => vec![vec![specs[0]; n_samples]],
            Self::PerSample(specs) => vec![specs.clone()],
            Self::AllClasses(kind) => (0..n_classes)
                .map(|class| vec![TargetSpec::new(*kind, class); n_samples])
                .collect(),
        };
        Ok(passes)
    }
}

/// Differentiable sum of the per-sample target scores.
///
/// Samples do not interact in inference mode, so the gradient of the sum with
/// respect to a sample's activations is the gradient of that sample's score.
pub(crate) fn target_score<B: Backend>(logits: Tensor<B, 2>, targets: &[TargetSpec]) -> Tensor<B, 1> {
    let [n, k] = logits.dims();
    let device = logits.device();
    let mut logit_mask = vec![0.0f32; n * k];
    let mut softmax_mask = vec![0.0f32; n * k];
    for (i, spec) in targets.iter().enumerate() {
        match spec {
            TargetSpec::Logit(c) => logit_mask[i * k + c] = 1.0,
            TargetSpec::Softmax(c) => softmax_mask[i * k + c] = 1.0,
        }
    }
    let mask = |values: Vec<f32>| Tensor::<B, 2>::from_data(TensorData::new(values, [n, k]), &device);

    let mut score = (logits.clone() * mask(logit_mask)).sum();
    if targets.iter().any(|t| t.kind() == TargetKind::Softmax) {
        score = score + (softmax(logits, 1) * mask(softmax_mask)).sum();
    }
    score
}

/// Host-side target scores for a `(n, k)` row-major logit buffer.
pub(crate) fn host_scores(logits: &[f32], n_classes: usize, targets: &[TargetSpec]) -> Vec<f32> {
    logits
        .chunks(n_classes)
        .zip(targets)
        .map(|(row, spec)| spec.score_row(row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use camlab_core::backend::NdArray;

    #[test]
    fn test_passes_expand_selection() {
        let passes = TargetSelection::class(TargetSpec::Softmax(2))
            .passes(3, 4, || unreachable!())
            .unwrap();
        assert_eq!(passes, vec![vec![TargetSpec::Softmax(2); 3]]);

        let passes = TargetSelection::AllClasses(TargetKind::Logit)
            .passes(2, 3, || unreachable!())
            .unwrap();
        assert_eq!(passes.len(), 3);
        assert_eq!(passes[2], vec![TargetSpec::Logit(2); 2]);

        let passes = TargetSelection::Predicted.passes(2, 3, || Ok(vec![1, 0])).unwrap();
        assert_eq!(passes, vec![vec![TargetSpec::Logit(1), TargetSpec::Logit(0)]]);
    }

    #[test]
    fn test_validate_rejects_bad_targets() {
        assert!(matches!(
            TargetSelection::class(TargetSpec::Logit(10)).validate(4, 10),
            Err(ExplainError::TargetOutOfRange { class: 10, n_classes: 10 })
        ));
        assert!(matches!(
            TargetSelection::PerSample(vec![TargetSpec::Logit(0); 2]).validate(3, 10),
            Err(ExplainError::TargetCountMismatch { expected: 3, got: 2 })
        ));
        assert!(TargetSelection::PerSample(vec![TargetSpec::Logit(0); 3]).validate(3, 10).is_ok());
    }

    #[test]
    fn test_score_row() {
        let row = [1.0, 2.0, 3.0];
        assert_eq!(TargetSpec::Logit(1).score_row(&row), 2.0);
        let total: f32 = (0..3).map(|c| TargetSpec::Softmax(c).score_row(&row)).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_target_score_matches_host_scores() {
        let device = Default::default();
        let values = vec![0.5, -1.0, 2.0, 1.5, 0.0, -0.5];
        let logits = Tensor::<NdArray, 2>::from_data(TensorData::new(values.clone(), [2, 3]), &device);
        let targets = [TargetSpec::Logit(2), TargetSpec::Softmax(0)];

        let score: f32 = target_score(logits, &targets).into_scalar();
        let expected: f32 = host_scores(&values, 3, &targets).iter().sum();
        assert_relative_eq!(score, expected, epsilon = 1e-5);
    }
}
