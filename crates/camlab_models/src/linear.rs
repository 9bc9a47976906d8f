//! Linear (logistic-regression) classifier over flattened pixels.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use camlab_core::{CoreError, ForwardMode, ImageClassifier, ImageShape, Result};

/// Name of the only addressable stage: the input image itself.
pub const INPUT_LAYER: &str = "input";

/// Configuration for the linear classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifierConfig {
    /// Shape of one input image.
    pub input_shape: ImageShape,
    /// Number of output classes.
    pub n_classes: usize,
}

impl LinearClassifierConfig {
    /// Create a new config.
    pub fn new(input_shape: ImageShape, n_classes: usize) -> Self {
        Self {
            input_shape,
            n_classes,
        }
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinearClassifier<B> {
        LinearClassifier::new(self, device)
    }
}

/// A single linear layer over the flattened image.
///
/// Exposes the input as its only stage, so saliency maps for this model
/// are at full input resolution.
#[derive(Module, Debug)]
pub struct LinearClassifier<B: Backend> {
    fc: Linear<B>,
    n_classes: usize,
    channels: usize,
    height: usize,
    width: usize,
}

impl<B: Backend> LinearClassifier<B> {
    /// Create a new linear classifier.
    pub fn new(config: &LinearClassifierConfig, device: &B::Device) -> Self {
        let shape = config.input_shape;
        Self {
            fc: LinearConfig::new(shape.numel(), config.n_classes).init(device),
            n_classes: config.n_classes,
            channels: shape.channels(),
            height: shape.height(),
            width: shape.width(),
        }
    }

    fn check_layer(layer: &str) -> Result<()> {
        if layer == INPUT_LAYER {
            Ok(())
        } else {
            Err(CoreError::unknown_layer(layer, &[INPUT_LAYER]))
        }
    }
}

impl<B: Backend> ImageClassifier<B> for LinearClassifier<B> {
    fn forward(&self, x: Tensor<B, 4>, _mode: ForwardMode) -> Tensor<B, 2> {
        let [batch, c, h, w] = x.dims();
        self.fc.forward(x.reshape([batch, c * h * w]))
    }

    fn layer_names(&self) -> Vec<&'static str> {
        vec![INPUT_LAYER]
    }

    fn forward_features(
        &self,
        x: Tensor<B, 4>,
        layer: &str,
        _mode: ForwardMode,
    ) -> Result<Tensor<B, 4>> {
        Self::check_layer(layer)?;
        Ok(x)
    }

    fn forward_from(
        &self,
        activation: Tensor<B, 4>,
        layer: &str,
        mode: ForwardMode,
    ) -> Result<Tensor<B, 2>> {
        Self::check_layer(layer)?;
        Ok(self.forward(activation, mode))
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn input_shape(&self) -> ImageShape {
        ImageShape::new(self.channels, self.height, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlab_core::backend::NdArray;

    type B = NdArray;

    #[test]
    fn test_linear_forward() {
        let device = Default::default();
        let model = LinearClassifierConfig::new(ImageShape::grayscale(4, 4), 2).init::<B>(&device);
        let x = Tensor::<B, 4>::ones([5, 1, 4, 4], &device);

        assert_eq!(model.forward(x.clone(), ForwardMode::Train).dims(), [5, 2]);
        assert_eq!(model.layer_names(), vec!["input"]);

        let act = model.forward_features(x, "input", ForwardMode::Inference).unwrap();
        assert_eq!(act.dims(), [5, 1, 4, 4]);
        assert!(model.forward_from(act, "conv", ForwardMode::Inference).is_err());
    }
}
