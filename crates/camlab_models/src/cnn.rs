//! Small convolutional classifier for grayscale digits.
//!
//! Three valid-padded conv blocks followed by a flattening linear head.
//! With the default configuration on a 1×28×28 input the stages produce
//! 32×13×13, 64×11×11 and 128×9×9 activations.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use camlab_core::{CoreError, ForwardMode, ImageClassifier, ImageShape, Result};

/// Names of the addressable stages, input to output.
pub const CNN_LAYERS: [&str; 3] = ["cnn_block1", "cnn_block2", "cnn_block3"];

/// Configuration for the CNN classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CnnClassifierConfig {
    /// Shape of one input image.
    pub input_shape: ImageShape,
    /// Number of output classes.
    pub n_classes: usize,
    /// Output channels of the three conv blocks.
    pub filters: [usize; 3],
    /// Square kernel size shared by all conv blocks.
    pub kernel_size: usize,
    /// Stride of the first conv block; later blocks use stride 1.
    pub first_stride: usize,
}

impl Default for CnnClassifierConfig {
    fn default() -> Self {
        Self {
            input_shape: ImageShape::grayscale(28, 28),
            n_classes: 10,
            filters: [32, 64, 128],
            kernel_size: 3,
            first_stride: 2,
        }
    }
}

impl CnnClassifierConfig {
    /// Create a new config with specified dimensions.
    pub fn new(input_shape: ImageShape, n_classes: usize) -> Self {
        Self {
            input_shape,
            n_classes,
            ..Default::default()
        }
    }

    /// Set the number of filters for all blocks.
    #[must_use]
    pub fn with_filters(mut self, f1: usize, f2: usize, f3: usize) -> Self {
        self.filters = [f1, f2, f3];
        self
    }

    /// Set the kernel size.
    #[must_use]
    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    /// Set the stride of the first block.
    #[must_use]
    pub fn with_first_stride(mut self, stride: usize) -> Self {
        self.first_stride = stride;
        self
    }

    /// Spatial size `(H, W)` after each block.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is too small for the kernels or a
    /// size parameter is zero.
    pub fn stage_sizes(&self) -> Result<[(usize, usize); 3]> {
        if self.kernel_size == 0 || self.first_stride == 0 || self.n_classes == 0 {
            return Err(CoreError::Other(
                "kernel_size, first_stride and n_classes must be positive".to_string(),
            ));
        }

        let out = |size: usize, stride: usize| -> Result<usize> {
            size.checked_sub(self.kernel_size)
                .map(|rest| rest / stride + 1)
                .ok_or_else(|| CoreError::InvalidShape {
                    expected: format!("spatial size >= {}", self.kernel_size),
                    got: size.to_string(),
                })
        };

        let (h, w) = (self.input_shape.height(), self.input_shape.width());
        let s1 = (out(h, self.first_stride)?, out(w, self.first_stride)?);
        let s2 = (out(s1.0, 1)?, out(s1.1, 1)?);
        let s3 = (out(s2.0, 1)?, out(s2.1, 1)?);
        Ok([s1, s2, s3])
    }

    /// Check that the configuration produces a valid network.
    ///
    /// # Errors
    ///
    /// See [`stage_sizes`](Self::stage_sizes).
    pub fn validate(&self) -> Result<()> {
        self.stage_sizes().map(|_| ())
    }

    /// Initialize the model.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<CnnClassifier<B>> {
        CnnClassifier::new(self.clone(), device)
    }
}

/// A single convolutional block: Conv2d -> BatchNorm -> ReLU
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    /// Convolutional layer.
    conv: Conv2d<B>,
    /// Batch normalization.
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new convolutional block.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(false)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }

    /// Forward pass through the block.
    pub fn forward(&self, x: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 4> {
        let out = self.conv.forward(x);
        let out = match mode {
            ForwardMode::Train => self.bn.forward(out),
            ForwardMode::Inference => batch_norm_inference(&self.bn, out),
        };
        Relu::new().forward(out)
    }
}

/// Normalize with the running statistics, whatever the backend.
///
/// `BatchNorm::forward` picks batch statistics whenever the backend tracks
/// gradients, which would let saliency passes mutate the model.
pub(crate) fn batch_norm_inference<B: Backend>(bn: &BatchNorm<B, 2>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let channels = x.dims()[1];
    let shape = [1, channels, 1, 1];

    let mean = bn.running_mean.value().reshape(shape);
    let var = bn.running_var.value().reshape(shape);
    let gamma = bn.gamma.val().reshape(shape);
    let beta = bn.beta.val().reshape(shape);

    let std = var.add_scalar(bn.epsilon).sqrt();
    x.sub(mean).div(std).mul(gamma).add(beta)
}

/// Convolutional classifier with three named stages.
///
/// Architecture:
/// - `cnn_block1`: Conv2d(C, 32, 3×3, stride 2) -> BatchNorm -> ReLU
/// - `cnn_block2`: Conv2d(32, 64, 3×3) -> BatchNorm -> ReLU
/// - `cnn_block3`: Conv2d(64, 128, 3×3) -> BatchNorm -> ReLU
/// - Flatten -> Linear(128·H3·W3, n_classes)
///
/// # Example
///
/// ```rust,ignore
/// use camlab_models::CnnClassifierConfig;
///
/// let model = CnnClassifierConfig::default().init::<NdArray>(&device)?;
/// let logits = model.forward(x, ForwardMode::Inference);
/// // logits shape: [batch, 10]
/// ```
#[derive(Module, Debug)]
pub struct CnnClassifier<B: Backend> {
    /// First convolutional block.
    block1: ConvBlock<B>,
    /// Second convolutional block.
    block2: ConvBlock<B>,
    /// Third convolutional block.
    block3: ConvBlock<B>,
    /// Final linear classifier.
    fc: Linear<B>,
    n_classes: usize,
    channels: usize,
    height: usize,
    width: usize,
}

impl<B: Backend> CnnClassifier<B> {
    /// Create a new CNN classifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: CnnClassifierConfig, device: &B::Device) -> Result<Self> {
        let [_, _, (h3, w3)] = config.stage_sizes()?;
        let [f1, f2, f3] = config.filters;
        let k = config.kernel_size;
        let shape = config.input_shape;

        Ok(Self {
            block1: ConvBlock::new(shape.channels(), f1, k, config.first_stride, device),
            block2: ConvBlock::new(f1, f2, k, 1, device),
            block3: ConvBlock::new(f2, f3, k, 1, device),
            fc: LinearConfig::new(f3 * h3 * w3, config.n_classes).init(device),
            n_classes: config.n_classes,
            channels: shape.channels(),
            height: shape.height(),
            width: shape.width(),
        })
    }

    fn blocks(&self) -> [&ConvBlock<B>; 3] {
        [&self.block1, &self.block2, &self.block3]
    }

    fn stage_index(&self, layer: &str) -> Result<usize> {
        CNN_LAYERS
            .iter()
            .position(|name| *name == layer)
            .ok_or_else(|| CoreError::unknown_layer(layer, &CNN_LAYERS))
    }

    fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, c, h, w] = features.dims();
        self.fc.forward(features.reshape([batch, c * h * w]))
    }
}

impl<B: Backend> ImageClassifier<B> for CnnClassifier<B> {
    fn forward(&self, x: Tensor<B, 4>, mode: ForwardMode) -> Tensor<B, 2> {
        let out = self
            .blocks()
            .into_iter()
            .fold(x, |out, block| block.forward(out, mode));
        self.head(out)
    }

    fn layer_names(&self) -> Vec<&'static str> {
        CNN_LAYERS.to_vec()
    }

    fn forward_features(
        &self,
        x: Tensor<B, 4>,
        layer: &str,
        mode: ForwardMode,
    ) -> Result<Tensor<B, 4>> {
        let stage = self.stage_index(layer)?;
        Ok(self.blocks()[..=stage]
            .iter()
            .fold(x, |out, block| block.forward(out, mode)))
    }

    fn forward_from(
        &self,
        activation: Tensor<B, 4>,
        layer: &str,
        mode: ForwardMode,
    ) -> Result<Tensor<B, 2>> {
        let stage = self.stage_index(layer)?;
        let out = self.blocks()[stage + 1..]
            .iter()
            .fold(activation, |out, block| block.forward(out, mode));
        Ok(self.head(out))
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
    use approx::assert_relative_eq;
    use burn::tensor::Distribution;
    use camlab_core::backend::NdArray;

    type B = NdArray;

    fn small_config() -> CnnClassifierConfig {
        CnnClassifierConfig::new(ImageShape::grayscale(12, 12), 4).with_filters(4, 6, 8)
    }

    #[test]
    fn test_cnn_config_default() {
        let config = CnnClassifierConfig::default();
        assert_eq!(config.filters, [32, 64, 128]);
        assert_eq!(config.stage_sizes().unwrap(), [(13, 13), (11, 11), (9, 9)]);
    }

    #[test]
    fn test_cnn_config_rejects_tiny_input() {
        let config = CnnClassifierConfig::new(ImageShape::grayscale(5, 5), 2);
        assert!(config.validate().is_err());
        assert!(CnnClassifierConfig::default().with_kernel_size(0).validate().is_err());
    }

    #[test]
    fn test_cnn_forward_shapes() {
        let device = Default::default();
        let model = small_config().init::<B>(&device).unwrap();
        let x = Tensor::<B, 4>::random([2, 1, 12, 12], Distribution::Default, &device);

        assert_eq!(model.forward(x.clone(), ForwardMode::Inference).dims(), [2, 4]);
        assert_eq!(model.n_classes(), 4);
        assert_eq!(model.input_shape(), ImageShape::grayscale(12, 12));

        let act = model.forward_features(x, "cnn_block2", ForwardMode::Inference).unwrap();
        // 12 -> 5 -> 3
        assert_eq!(act.dims(), [2, 6, 3, 3]);
    }

    #[test]
    fn test_cnn_split_forward_matches_full_forward() {
        let device = Default::default();
        let model = small_config().init::<B>(&device).unwrap();
        let x = Tensor::<B, 4>::random([3, 1, 12, 12], Distribution::Default, &device);
        let full: Vec<f32> = model
            .forward(x.clone(), ForwardMode::Inference)
            .into_data()
            .to_vec()
            .unwrap();

        for layer in model.layer_names() {
            let act = model.forward_features(x.clone(), layer, ForwardMode::Inference).unwrap();
            let split: Vec<f32> = model
                .forward_from(act, layer, ForwardMode::Inference)
                .unwrap()
                .into_data()
                .to_vec()
                .unwrap();
            for (a, b) in full.iter().zip(&split) {
                assert_relative_eq!(a, b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_cnn_unknown_layer() {
        let device = Default::default();
        let model = small_config().init::<B>(&device).unwrap();
        let x = Tensor::<B, 4>::zeros([1, 1, 12, 12], &device);

        let err = model.forward_features(x, "fc", ForwardMode::Inference).unwrap_err();
        assert!(matches!(err, CoreError::UnknownLayer { .. }));
        assert!(!model.has_layer("fc"));
        assert!(model.has_layer("cnn_block3"));
    }

    #[test]
    fn test_inference_batch_norm_matches_burn_on_plain_backend() {
        // Without autodiff, burn's BatchNorm already uses running statistics.
        let device = Default::default();
        let block = ConvBlock::<B>::new(1, 3, 3, 1, &device);
        let x = Tensor::<B, 4>::random([2, 1, 6, 6], Distribution::Default, &device);

        let burn_out: Vec<f32> = block.forward(x.clone(), ForwardMode::Train).into_data().to_vec().unwrap();
        let ours: Vec<f32> = block.forward(x, ForwardMode::Inference).into_data().to_vec().unwrap();

        for (a, b) in burn_out.iter().zip(&ours) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
    }
}
