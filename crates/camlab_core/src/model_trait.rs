//! Model trait for training, evaluation and saliency.
//!
//! Defines what a classifier must expose to be trained by `camlab_train`
//! and explained by `camlab_explain`.

use burn::prelude::*;
use burn::tensor::activation::softmax;

use crate::error::Result;
use crate::mode::ForwardMode;
use crate::shape::ImageShape;

/// Image classification model with named feature-extraction stages.
///
/// The forward pass can be split at any stage returned by
/// [`layer_names`](ImageClassifier::layer_names):
/// `forward_from(forward_features(x, l), l)` must equal `forward(x)`.
/// The explainer relies on this to read activations at a stage and to
/// differentiate the class score with respect to them.
pub trait ImageClassifier<B: Backend>: Module<B> + Clone + Send {
    /// Forward pass returning logits.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape (batch, channels, height, width)
    /// * `mode` - Training or inference behaviour
    ///
    /// # Returns
    ///
    /// Logits tensor of shape (batch, n_classes)
    fn forward(&self, x: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 2>;

    /// Names of the stages addressable for saliency hooking, input to output.
    fn layer_names(&self) -> Vec<&'static str>;

    /// Run the network up to and including `layer`, returning its activation map.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownLayer`](crate::CoreError::UnknownLayer) for a name
    /// not listed by `layer_names`.
    fn forward_features(
        &self,
        x: Tensor<B, 4>,
        layer: &str,
        mode: ForwardMode,
    ) -> Result<Tensor<B, 4>>;

    /// Continue the forward pass from the activation produced by `layer`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownLayer`](crate::CoreError::UnknownLayer) for a name
    /// not listed by `layer_names`.
    fn forward_from(
        &self,
        activation: Tensor<B, 4>,
        layer: &str,
        mode: ForwardMode,
    ) -> Result<Tensor<B, 2>>;

    /// Number of output classes.
    fn n_classes(&self) -> usize;

    /// Shape of one input record.
    fn input_shape(&self) -> ImageShape;

    /// Forward pass returning class probabilities.
    fn forward_probs(&self, x: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 2> {
        softmax(self.forward(x, mode), 1)
    }

    /// Check whether `layer` is one of the model's stages.
    fn has_layer(&self, layer: &str) -> bool {
        self.layer_names().iter().any(|name| *name == layer)
    }
}
