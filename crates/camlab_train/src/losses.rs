//! Loss functions.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;

/// A classification loss usable on any backend.
///
/// The same loss value is computed on the autodiff backend during the
/// training phase and on its inner backend during validation, hence the
/// backend-generic method.
pub trait ClassificationLoss {
    /// Mean loss over the batch, as a one-element tensor.
    fn forward<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1>;
}

/// Cross-entropy loss for classification.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss {
    smoothing: Option<f32>,
}

impl CrossEntropyLoss {
    /// Create a new cross-entropy loss.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use label smoothing with factor `alpha` in `[0, 1]`.
    #[must_use]
    pub fn with_smoothing(mut self, alpha: f32) -> Self {
        self.smoothing = Some(alpha);
        self
    }
}

impl ClassificationLoss for CrossEntropyLoss {
    fn forward<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let loss = CrossEntropyLossConfig::new()
            .with_smoothing(self.smoothing)
            .init(&logits.device());
        loss.forward(logits, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use camlab_core::backend::NdArray;

    type B = NdArray;

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::zeros([4, 10], &device);
        let targets = Tensor::<B, 1, Int>::from_ints([0, 3, 5, 9], &device);

        let loss: f32 = CrossEntropyLoss::new().forward(logits, targets).into_scalar();
        assert_relative_eq!(loss, 10f32.ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_cross_entropy_confident_prediction() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::from_floats([[20.0, 0.0], [0.0, 20.0]], &device);
        let targets = Tensor::<B, 1, Int>::from_ints([0, 1], &device);

        let loss: f32 = CrossEntropyLoss::new().forward(logits, targets).into_scalar();
        assert!(loss < 1e-6);
    }
}
