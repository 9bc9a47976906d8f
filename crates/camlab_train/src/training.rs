//! Training loop implementation.
//!
//! [`train`] builds a fresh model, loss and optimizer from factories, then
//! runs `epochs` rounds of a training phase followed by a validation
//! phase. It returns the per-epoch average losses and, on request, the
//! trained model.

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use camlab_core::{ForwardMode, ImageClassifier};
use camlab_data::ImageDataLoader;

use crate::callback::{CallbackContext, CallbackList, ProgressCallback};
use crate::error::{Result, TrainError};
use crate::losses::ClassificationLoss;
use crate::optimizer::OptimizerOptions;

/// Configuration for [`train`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Number of epochs, at least 1.
    pub epochs: usize,
    /// Options handed to the optimizer factory.
    pub optimizer: OptimizerOptions,
    /// Return the trained model in the output.
    pub return_model: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            optimizer: OptimizerOptions::default(),
            return_model: false,
        }
    }
}

impl TrainerConfig {
    /// Create a config for `epochs` epochs with default optimizer options.
    pub fn new(epochs: usize) -> Self {
        Self {
            epochs,
            ..Default::default()
        }
    }

    /// Set the optimizer options.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: OptimizerOptions) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.optimizer.learning_rate = learning_rate;
        self
    }

    /// Request the trained model in the output.
    #[must_use]
    pub fn with_return_model(mut self, return_model: bool) -> Self {
        self.return_model = return_model;
        self
    }

    /// Check the configuration before any compute.
    ///
    /// # Errors
    ///
    /// Returns an error for zero epochs or invalid optimizer options.
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(TrainError::InvalidConfig(
                "epochs must be a positive integer".to_string(),
            ));
        }
        self.optimizer.validate()
    }
}

/// Training output: loss history and, when requested, the trained model.
#[derive(Debug)]
pub struct TrainingOutput<M> {
    /// Average training loss per epoch (index 0 = epoch 1).
    pub train_losses: Vec<f32>,
    /// Average validation loss per epoch.
    pub valid_losses: Vec<f32>,
    /// Trained model, present when `return_model` was set.
    pub model: Option<M>,
}

/// Train a classifier, reporting progress through a [`ProgressCallback`].
///
/// See [`train_with_callbacks`].
#[allow(clippy::too_many_arguments)]
pub fn train<B, M, L, O, MF, LF, OF>(
    model_factory: MF,
    loss_factory: LF,
    optimizer_factory: OF,
    train_data: &ImageDataLoader,
    valid_data: &ImageDataLoader,
    config: &TrainerConfig,
    device: &B::Device,
) -> Result<TrainingOutput<M>>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    L: ClassificationLoss,
    O: Optimizer<M, B>,
    MF: FnOnce(&B::Device) -> M,
    LF: FnOnce() -> L,
    OF: FnOnce(&OptimizerOptions) -> O,
{
    let mut callbacks = CallbackList::new().with(ProgressCallback::default());
    train_with_callbacks(
        model_factory,
        loss_factory,
        optimizer_factory,
        train_data,
        valid_data,
        config,
        device,
        &mut callbacks,
    )
}

/// Train a classifier with explicit callbacks.
///
/// Each epoch runs two strictly sequential phases:
/// - training: per batch, a forward pass in [`ForwardMode::Train`], the
///   loss, a backward pass and one optimizer step; gradients are fresh for
///   every step;
/// - validation: forward and loss only, in [`ForwardMode::Inference`], on
///   the gradient-free inner module.
///
/// Epoch averages are `Σ(batch_loss × batch_size) / n_samples` where
/// `n_samples` is the loader's sampling-policy size.
///
/// # Errors
///
/// Configuration errors (zero epochs, invalid learning rate, shape
/// mismatch between model and data, unlabeled data) are reported before
/// any compute. Any error during an epoch aborts training.
#[allow(clippy::too_many_arguments)]
pub fn train_with_callbacks<B, M, L, O, MF, LF, OF>(
    model_factory: MF,
    loss_factory: LF,
    optimizer_factory: OF,
    train_data: &ImageDataLoader,
    valid_data: &ImageDataLoader,
    config: &TrainerConfig,
    device: &B::Device,
    callbacks: &mut CallbackList,
) -> Result<TrainingOutput<M>>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    L: ClassificationLoss,
    O: Optimizer<M, B>,
    MF: FnOnce(&B::Device) -> M,
    LF: FnOnce() -> L,
    OF: FnOnce(&OptimizerOptions) -> O,
{
    config.validate()?;
    for loader in [train_data, valid_data] {
        if !loader.dataset().has_targets() {
            return Err(TrainError::MissingTargets);
        }
    }

    let mut model = model_factory(device);
    for loader in [train_data, valid_data] {
        if model.input_shape() != loader.image_shape() {
            return Err(TrainError::ShapeMismatch {
                expected: model.input_shape(),
                got: loader.image_shape(),
            });
        }
    }

    let loss_fn = loss_factory();
    let mut optim = optimizer_factory(&config.optimizer);
    let lr = config.optimizer.learning_rate;

    let mut train_losses = Vec::with_capacity(config.epochs);
    let mut valid_losses = Vec::with_capacity(config.epochs);

    let mut ctx = CallbackContext::new(config.epochs, train_data.n_batches(), lr);
    callbacks.before_fit(&ctx)?;

    for epoch in 0..config.epochs {
        ctx.epoch = epoch;
        ctx.batch = 0;
        ctx.batch_loss = None;
        ctx.train_loss = None;
        ctx.valid_loss = None;
        callbacks.before_epoch(&ctx)?;

        let (trained, train_loss) = train_epoch::<B, _, _, _>(
            model,
            &mut optim,
            &loss_fn,
            train_data,
            lr,
            device,
            &mut ctx,
            callbacks,
        )?;
        model = trained;

        let valid_loss = valid_epoch::<B, _, _>(&model, &loss_fn, valid_data, device)?;

        if !train_loss.is_finite() || !valid_loss.is_finite() {
            tracing::warn!(
                epoch = epoch + 1,
                train_loss,
                valid_loss,
                "Non-finite loss, recording as is"
            );
        }

        train_losses.push(train_loss);
        valid_losses.push(valid_loss);

        ctx.train_loss = Some(train_loss);
        ctx.valid_loss = Some(valid_loss);
        callbacks.after_epoch(&ctx)?;
    }

    callbacks.after_fit(&ctx)?;

    Ok(TrainingOutput {
        train_losses,
        valid_losses,
        model: config.return_model.then_some(model),
    })
}

#[allow(clippy::too_many_arguments)]
fn train_epoch<B, M, L, O>(
    mut model: M,
    optim: &mut O,
    loss_fn: &L,
    loader: &ImageDataLoader,
    lr: f64,
    device: &B::Device,
    ctx: &mut CallbackContext,
    callbacks: &mut CallbackList,
) -> Result<(M, f32)>
where
    B: AutodiffBackend,
    M: ImageClassifier<B> + AutodiffModule<B>,
    L: ClassificationLoss,
    O: Optimizer<M, B>,
{
    let mut running = 0.0f64;

    for (batch_idx, batch) in loader.iter::<B>(device).enumerate() {
        let batch = batch?;
        let batch_size = batch.batch_size();
        let targets = batch.y.ok_or(TrainError::MissingTargets)?;

        let logits = model.forward(batch.x, ForwardMode::Train);
        let loss = loss_fn.forward(logits, targets);
        let loss_value = loss.clone().into_scalar().elem::<f32>();

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(lr, model, grads);

        running += f64::from(loss_value) * batch_size as f64;

        ctx.batch = batch_idx;
        ctx.batch_loss = Some(loss_value);
        callbacks.after_batch(ctx)?;
    }

    Ok((model, (running / loader.n_samples() as f64) as f32))
}

fn valid_epoch<B, M, L>(
    model: &M,
    loss_fn: &L,
    loader: &ImageDataLoader,
    device: &B::Device,
) -> Result<f32>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    L: ClassificationLoss,
{
    let inner_model = model.valid();
    let mut running = 0.0f64;

    for batch in loader.iter::<B::InnerBackend>(device) {
        let batch = batch?;
        let batch_size = batch.batch_size();
        let targets = batch.y.ok_or(TrainError::MissingTargets)?;

        let logits = inner_model.forward(batch.x, ForwardMode::Inference);
        let loss_value = loss_fn.forward(logits, targets).into_scalar().elem::<f32>();

        running += f64::from(loss_value) * batch_size as f64;
    }

    Ok((running / loader.n_samples() as f64) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::losses::CrossEntropyLoss;
    use crate::optimizer::adam;
    use approx::assert_relative_eq;
    use camlab_core::backend::{Autodiff, NdArray};
    use camlab_core::{ImageShape, Seed};
    use camlab_data::{ImageDataset, SamplerPolicy};
    use camlab_models::{LinearClassifier, LinearClassifierConfig};
    use ndarray::Array4;

    type B = Autodiff<NdArray>;

    /// Two classes told apart by the sign of the mean pixel.
    fn toy_dataset(n: usize) -> ImageDataset {
        let x = Array4::from_shape_fn((n, 1, 4, 4), |(i, _, h, w)| {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            sign * (0.5 + 0.01 * ((h * 4 + w + i) % 7) as f32)
        });
        let y = (0..n).map(|i| i % 2).collect();
        ImageDataset::from_arrays(x, Some(y)).unwrap()
    }

    fn loader(ds: ImageDataset, batch_size: usize) -> ImageDataLoader {
        ImageDataLoader::builder(ds).batch_size(batch_size).build().unwrap()
    }

    fn linear(device: &<B as Backend>::Device) -> LinearClassifier<B> {
        LinearClassifierConfig::new(ImageShape::grayscale(4, 4), 2).init(device)
    }

    #[test]
    fn test_loss_lists_have_one_entry_per_epoch() {
        let device = Default::default();
        let train_dl = ImageDataLoader::builder(toy_dataset(20))
            .batch_size(8)
            .policy(SamplerPolicy::shuffle(Seed::new(0)))
            .build()
            .unwrap();
        let valid_dl = loader(toy_dataset(10), 4);

        for epochs in [1, 3] {
            let config = TrainerConfig::new(epochs);
            let out = train::<B, _, _, _, _, _, _>(
                linear,
                CrossEntropyLoss::new,
                adam::<B, LinearClassifier<B>>,
                &train_dl,
                &valid_dl,
                &config,
                &device,
            )
            .unwrap();

            assert_eq!(out.train_losses.len(), epochs);
            assert_eq!(out.valid_losses.len(), epochs);
            assert!(out.model.is_none());
        }
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let device = Default::default();
        let dl = loader(toy_dataset(4), 2);
        let err = train::<B, _, _, _, _, _, _>(
            linear,
            CrossEntropyLoss::new,
            adam::<B, LinearClassifier<B>>,
            &dl,
            &dl,
            &TrainerConfig::new(0),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::InvalidConfig(_)));
    }

    #[test]
    fn test_negative_learning_rate_rejected() {
        let device = Default::default();
        let dl = loader(toy_dataset(4), 2);
        let err = train::<B, _, _, _, _, _, _>(
            linear,
            CrossEntropyLoss::new,
            adam::<B, LinearClassifier<B>>,
            &dl,
            &dl,
            &TrainerConfig::new(1).with_learning_rate(-1.0),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::InvalidLearningRate(_)));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let device = Default::default();
        let dl = loader(toy_dataset(4), 2);
        let wrong = |device: &<B as Backend>::Device| {
            LinearClassifierConfig::new(ImageShape::grayscale(28, 28), 2).init::<B>(device)
        };
        let err = train::<B, _, _, _, _, _, _>(
            wrong,
            CrossEntropyLoss::new,
            adam::<B, LinearClassifier<B>>,
            &dl,
            &dl,
            &TrainerConfig::new(1),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_unlabeled_data_rejected() {
        let device = Default::default();
        let unlabeled = ImageDataset::from_arrays(Array4::zeros((4, 1, 4, 4)), None).unwrap();
        let dl = loader(unlabeled, 2);
        let err = train::<B, _, _, _, _, _, _>(
            linear,
            CrossEntropyLoss::new,
            adam::<B, LinearClassifier<B>>,
            &dl,
            &dl,
            &TrainerConfig::new(1),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::MissingTargets));
    }

    #[test]
    fn test_average_loss_independent_of_batch_size() {
        let device = Default::default();
        let base = linear(&device);
        let config = TrainerConfig::new(2).with_learning_rate(0.0);
        let train_ds = toy_dataset(12);
        let valid_ds = toy_dataset(10);

        let run = |batch_size: usize| {
            train::<B, _, _, _, _, _, _>(
                |_: &<B as Backend>::Device| base.clone(),
                CrossEntropyLoss::new,
                adam::<B, LinearClassifier<B>>,
                &loader(train_ds.clone(), batch_size),
                &loader(valid_ds.clone(), batch_size),
                &config,
                &device,
            )
            .unwrap()
        };

        let a = run(3);
        let b = run(7);
        for (x, y) in a.valid_losses.iter().zip(&b.valid_losses) {
            assert_relative_eq!(x, y, epsilon = 1e-5);
        }
        for (x, y) in a.train_losses.iter().zip(&b.train_losses) {
            assert_relative_eq!(x, y, epsilon = 1e-5);
        }
        // frozen parameters: every epoch sees the same model
        assert_relative_eq!(a.valid_losses[0], a.valid_losses[1], epsilon = 1e-6);
    }

    #[test]
    fn test_training_reduces_loss_and_returns_model() {
        let device = Default::default();
        let train_dl = loader(toy_dataset(40), 8);
        let valid_dl = loader(toy_dataset(10), 5);
        let config = TrainerConfig::new(3)
            .with_learning_rate(0.05)
            .with_return_model(true);

        let out = train::<B, _, _, _, _, _, _>(
            linear,
            CrossEntropyLoss::new,
            adam::<B, LinearClassifier<B>>,
            &train_dl,
            &valid_dl,
            &config,
            &device,
        )
        .unwrap();

        assert!(out.train_losses.windows(2).any(|w| w[1] < w[0]));
        assert!(out.model.is_some());
    }
}
