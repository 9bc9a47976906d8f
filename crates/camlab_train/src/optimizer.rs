//! Optimizer options and factories.
//!
//! The training engine builds its optimizer from a factory taking
//! [`OptimizerOptions`], so every `train` call starts with fresh state.
//! [`adam`] and [`sgd`] wrap burn's optimizers and can be passed as the
//! factory directly.

use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{AdamConfig, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

/// Options recognized by the optimizer factories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    /// Learning rate. Zero freezes the parameters.
    pub learning_rate: f64,
    /// L2 penalty added to the gradients (0 = disabled).
    pub weight_decay: f32,
    /// Momentum for SGD (0 = disabled). Ignored by Adam.
    pub momentum: f64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 0.0,
            momentum: 0.0,
        }
    }
}

impl OptimizerOptions {
    /// Create options with the given learning rate.
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..Default::default()
        }
    }

    /// Set the weight decay.
    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Set the SGD momentum.
    #[must_use]
    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    /// Check the options before any compute.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative or non-finite learning rate, or a
    /// negative weight decay or momentum.
    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(TrainError::InvalidLearningRate(self.learning_rate));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(TrainError::InvalidConfig(format!(
                "weight_decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        if !self.momentum.is_finite() || self.momentum < 0.0 {
            return Err(TrainError::InvalidConfig(format!(
                "momentum must be >= 0, got {}",
                self.momentum
            )));
        }
        Ok(())
    }

    fn weight_decay_config(&self) -> Option<WeightDecayConfig> {
        (self.weight_decay > 0.0).then(|| WeightDecayConfig::new(self.weight_decay))
    }
}

/// Adam optimizer factory.
pub fn adam<B, M>(options: &OptimizerOptions) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    AdamConfig::new()
        .with_weight_decay(options.weight_decay_config())
        .init::<B, M>()
}

/// Stochastic gradient descent factory, with optional momentum.
pub fn sgd<B, M>(options: &OptimizerOptions) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let momentum = (options.momentum > 0.0)
        .then(|| MomentumConfig::new().with_momentum(options.momentum));

    SgdConfig::new()
        .with_weight_decay(options.weight_decay_config())
        .with_momentum(momentum)
        .init::<B, M>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = OptimizerOptions::default();
        assert_eq!(options.learning_rate, 1e-3);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        assert!(OptimizerOptions::new(0.0).validate().is_ok());
        assert!(matches!(
            OptimizerOptions::new(-1e-3).validate(),
            Err(TrainError::InvalidLearningRate(_))
        ));
        assert!(OptimizerOptions::new(f64::NAN).validate().is_err());
        assert!(OptimizerOptions::new(1e-3).with_weight_decay(-0.1).validate().is_err());
        assert!(OptimizerOptions::new(1e-3).with_momentum(-0.5).validate().is_err());
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: OptimizerOptions = serde_json::from_str(r#"{"learning_rate": 0.01}"#).unwrap();
        assert_eq!(options.learning_rate, 0.01);
        assert_eq!(options.weight_decay, 0.0);
    }
}
