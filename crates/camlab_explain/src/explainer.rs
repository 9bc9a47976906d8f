//! Saliency explainer.
//!
//! [`compute_saliency`] is the headless core: it returns one
//! [`LayerSaliency`] per target layer, each holding a `[0, 1]` map per
//! (target pass, sample) at the layer's activation resolution.
//! [`explain`] draws samples from a dataset, runs the core and assembles one
//! [`SaliencyFigure`] per layer.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::{s, Array1, Array2, Array4, ArrayView4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use camlab_core::{CoreError, ImageClassifier, ImageShape, Seed};
use camlab_data::{DataError, ImageDataset};

use crate::cam::{apply_channel_weights, gradient_weighted, reduce_maps, CamMethod};
use crate::capture::{
    capture_activations, capture_gradients, forward_scores, predicted_classes, scores_from,
    LayerCapture,
};
use crate::error::{ExplainError, Result};
use crate::figure::{FigureColumn, SaliencyFigure};
use crate::image::{flip_horizontal, overlay, resize_bilinear, to_grayscale};
use crate::target::{TargetSelection, TargetSpec};

/// Input scalings used by test-time augmentation, each with and without a
/// horizontal flip.
const AUG_FACTORS: [f32; 3] = [0.9, 1.0, 1.1];

/// Options of a saliency run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CamOptions {
    /// Average maps over flipped and rescaled copies of the inputs.
    pub aug_smooth: bool,
    /// Collapse channels by their first principal component instead of a sum.
    pub eigen_smooth: bool,
    /// Seed of the sample draw in [`explain`].
    pub seed: Seed,
    /// Annotate figure columns with the ground-truth label.
    pub show_labels: bool,
    /// Index to name table for labels.
    pub class_names: Option<Vec<String>>,
    /// Share of the input image in overlays, in `[0, 1]`.
    pub image_weight: f32,
    /// Samples per forward pass.
    pub batch_size: usize,
}

impl Default for CamOptions {
    fn default() -> Self {
        Self {
            aug_smooth: false,
            eigen_smooth: false,
            seed: Seed::default(),
            show_labels: true,
            class_names: None,
            image_weight: 0.5,
            batch_size: 32,
        }
    }
}

impl CamOptions {
    /// Enable or disable test-time augmentation.
    #[must_use]
    pub fn with_aug_smooth(mut self, aug_smooth: bool) -> Self {
        self.aug_smooth = aug_smooth;
        self
    }

    /// Enable or disable principal component smoothing.
    #[must_use]
    pub fn with_eigen_smooth(mut self, eigen_smooth: bool) -> Self {
        self.eigen_smooth = eigen_smooth;
        self
    }

    /// Set the sampling seed.
    #[must_use]
    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    /// Show or hide labels.
    #[must_use]
    pub fn with_show_labels(mut self, show_labels: bool) -> Self {
        self.show_labels = show_labels;
        self
    }

    /// Set the class name table.
    #[must_use]
    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = Some(class_names);
        self
    }

    /// Set the overlay image weight.
    #[must_use]
    pub fn with_image_weight(mut self, image_weight: f32) -> Self {
        self.image_weight = image_weight;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Check option values.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::InvalidOption`] for an image weight outside
    /// `[0, 1]` or a zero batch size.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.image_weight) {
            return Err(ExplainError::InvalidOption(format!(
                "image_weight must be in [0, 1], got {}",
                self.image_weight
            )));
        }
        if self.batch_size == 0 {
            return Err(ExplainError::InvalidOption(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Display name of a class.
    pub fn label_name(&self, class: usize) -> String {
        self.class_names
            .as_ref()
            .and_then(|names| names.get(class).cloned())
            .unwrap_or_else(|| class.to_string())
    }
}

/// Saliency maps of one target layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSaliency {
    /// Layer name.
    pub layer: String,
    /// One map per (pass, sample), pass-major.
    pub maps: Vec<Array2<f32>>,
    /// Target explained by each map.
    pub targets: Vec<TargetSpec>,
}

impl LayerSaliency {
    /// Number of maps.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Whether there are no maps.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Map resolution `(h, w)`.
    pub fn resolution(&self) -> Option<(usize, usize)> {
        self.maps.first().map(Array2::dim)
    }
}

/// Compute saliency maps on an autodiff backend.
///
/// `inputs` is `(N, C, H, W)` and must match the model input shape. Every
/// [`CamMethod`] is available. Configuration errors are raised before any
/// forward pass.
///
/// # Errors
///
/// Returns [`ExplainError::EmptyLayers`], [`ExplainError::ZeroSamples`],
/// [`ExplainError::ShapeMismatch`], an unknown layer error, or a target error
/// for an invalid request, and [`ExplainError::GradientsUnavailable`] when a
/// layer receives no gradient.
pub fn compute_saliency<B, M>(
    model: &M,
    method: CamMethod,
    target_layers: &[&str],
    targets: &TargetSelection,
    inputs: ArrayView4<f32>,
    options: &CamOptions,
    device: &B::Device,
) -> Result<Vec<LayerSaliency>>
where
    B: AutodiffBackend,
    M: ImageClassifier<B>,
{
    run::<B, M, _>(
        model,
        method,
        target_layers,
        targets,
        inputs,
        options,
        device,
        |x: ArrayView4<f32>, layer: &str, t: &[TargetSpec]| {
            capture_gradients::<B, M>(model, x, layer, t, device)
        },
    )
}

/// Compute saliency maps on a backend without gradient tracking.
///
/// Only the gradient-free methods (`EigenCam`, `AblationCam`, `ScoreCam`)
/// are available.
///
/// # Errors
///
/// Returns [`ExplainError::GradientsUnavailable`] for a gradient method, and
/// the errors of [`compute_saliency`] otherwise.
pub fn compute_saliency_inner<B, M>(
    model: &M,
    method: CamMethod,
    target_layers: &[&str],
    targets: &TargetSelection,
    inputs: ArrayView4<f32>,
    options: &CamOptions,
    device: &B::Device,
) -> Result<Vec<LayerSaliency>>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    validate_request::<B, M>(model, target_layers, targets, inputs, options)?;
    if method.requires_gradients() {
        return Err(ExplainError::GradientsUnavailable(format!(
            "{} needs an autodiff backend",
            method
        )));
    }
    run::<B, M, _>(
        model,
        method,
        target_layers,
        targets,
        inputs,
        options,
        device,
        |_: ArrayView4<f32>, layer: &str, _: &[TargetSpec]| {
            Err(ExplainError::GradientsUnavailable(format!(
                "layer '{}' has no gradient on this backend",
                layer
            )))
        },
    )
}

/// Explain `sample_count` samples drawn from `dataset`.
///
/// Indices are drawn uniformly with replacement from `options.seed`, so a
/// sample may appear in several columns. Returns one figure per target
/// layer.
///
/// # Errors
///
/// See [`compute_saliency`]; an empty dataset is a data error.
#[allow(clippy::too_many_arguments)]
pub fn explain<B, M>(
    model: &M,
    method: CamMethod,
    target_layers: &[&str],
    targets: &TargetSelection,
    dataset: &ImageDataset,
    sample_count: usize,
    options: &CamOptions,
    device: &B::Device,
) -> Result<Vec<SaliencyFigure>>
where
    B: AutodiffBackend,
    M: ImageClassifier<B>,
{
    if sample_count == 0 {
        return Err(ExplainError::ZeroSamples);
    }
    if dataset.is_empty() {
        return Err(DataError::EmptyDataset.into());
    }

    let indices = sample_indices(dataset.len(), sample_count, options.seed);
    let samples = dataset.subset(&indices)?;
    let saliency = compute_saliency::<B, M>(
        model,
        method,
        target_layers,
        targets,
        samples.x().view(),
        options,
        device,
    )?;

    tracing::info!(
        method = %method,
        layers = target_layers.len(),
        samples = sample_count,
        "Computed saliency maps"
    );
    build_figures(saliency, method, &samples, &indices, options)
}

/// `count` indices in `0..n`, drawn with replacement.
pub fn sample_indices(n: usize, count: usize, seed: Seed) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let mut rng = seed.to_rng();
    (0..count).map(|_| rng.gen_range(0..n)).collect()
}

/// Assemble figures from computed maps.
///
/// `samples` holds the explained records in map order and `indices` their
/// positions in the source dataset.
///
/// # Errors
///
/// Returns an error when the maps cannot be resized or blended.
pub fn build_figures(
    saliency: Vec<LayerSaliency>,
    method: CamMethod,
    samples: &ImageDataset,
    indices: &[usize],
    options: &CamOptions,
) -> Result<Vec<SaliencyFigure>> {
    let n = samples.len();
    if n == 0 {
        return Err(ExplainError::ZeroSamples);
    }
    let shape = samples.image_shape();

    saliency
        .into_iter()
        .map(|layer| {
            let columns = layer
                .maps
                .into_iter()
                .zip(layer.targets)
                .enumerate()
                .map(|(j, (map, target))| {
                    let i = j % n;
                    let input = to_grayscale(samples.x().slice(s![i, .., .., ..]));
                    let mask = resize_bilinear(map.view(), shape.height(), shape.width())?;
                    let overlay = overlay(input.view(), mask.view(), options.image_weight)?;
                    let label = if options.show_labels {
                        samples.labels().map(|labels| options.label_name(labels[i]))
                    } else {
                        None
                    };
                    Ok(FigureColumn {
                        sample_index: indices.get(i).copied().unwrap_or(i),
                        target,
                        label,
                        input,
                        map,
                        overlay,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(SaliencyFigure {
                layer: layer.layer,
                method,
                columns,
            })
        })
        .collect()
}

fn validate_request<B, M>(
    model: &M,
    target_layers: &[&str],
    targets: &TargetSelection,
    inputs: ArrayView4<f32>,
    options: &CamOptions,
) -> Result<()>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    options.validate()?;
    if target_layers.is_empty() {
        return Err(ExplainError::EmptyLayers);
    }
    let (n, c, h, w) = inputs.dim();
    if n == 0 {
        return Err(ExplainError::ZeroSamples);
    }
    let got = ImageShape::new(c, h, w);
    if got != model.input_shape() {
        return Err(ExplainError::ShapeMismatch {
            expected: model.input_shape(),
            got,
        });
    }
    for layer in target_layers {
        if !model.has_layer(layer) {
            return Err(CoreError::unknown_layer(layer, &model.layer_names()).into());
        }
    }
    targets.validate(n, model.n_classes())
}

#[allow(clippy::too_many_arguments)]
fn run<B, M, G>(
    model: &M,
    method: CamMethod,
    target_layers: &[&str],
    selection: &TargetSelection,
    inputs: ArrayView4<f32>,
    options: &CamOptions,
    device: &B::Device,
    gradients: G,
) -> Result<Vec<LayerSaliency>>
where
    B: Backend,
    M: ImageClassifier<B>,
    G: Fn(ArrayView4<f32>, &str, &[TargetSpec]) -> Result<LayerCapture>,
{
    validate_request::<B, M>(model, target_layers, selection, inputs, options)?;

    let n = inputs.dim().0;
    let batch_size = options.batch_size;
    let passes = selection.passes(n, model.n_classes(), || {
        let mut classes = Vec::with_capacity(n);
        for start in (0..n).step_by(batch_size) {
            let chunk = inputs.slice(s![start..(start + batch_size).min(n), .., .., ..]);
            classes.extend(predicted_classes::<B, M>(model, chunk, device)?);
        }
        Ok(classes)
    })?;

    let ctx = PassContext {
        model,
        method,
        options,
        device,
        gradients: &gradients,
    };

    target_layers
        .iter()
        .map(|layer| {
            let mut maps = Vec::with_capacity(passes.len() * n);
            let mut targets = Vec::with_capacity(passes.len() * n);
            for pass in &passes {
                for start in (0..n).step_by(batch_size) {
                    let end = (start + batch_size).min(n);
                    let chunk = inputs.slice(s![start..end, .., .., ..]);
                    maps.extend(ctx.layer_maps(layer, chunk, &pass[start..end])?);
                }
                targets.extend_from_slice(pass);
            }
            tracing::debug!(
                layer = *layer,
                method = %method,
                maps = maps.len(),
                "Layer saliency computed"
            );
            Ok(LayerSaliency {
                layer: layer.to_string(),
                maps,
                targets,
            })
        })
        .collect()
}

struct PassContext<'a, B: Backend, M, G> {
    model: &'a M,
    method: CamMethod,
    options: &'a CamOptions,
    device: &'a B::Device,
    gradients: &'a G,
}

impl<B, M, G> PassContext<'_, B, M, G>
where
    B: Backend,
    M: ImageClassifier<B>,
    G: Fn(ArrayView4<f32>, &str, &[TargetSpec]) -> Result<LayerCapture>,
{
    /// Maps of one chunk, averaged over augmentations when enabled.
    fn layer_maps(
        &self,
        layer: &str,
        inputs: ArrayView4<f32>,
        targets: &[TargetSpec],
    ) -> Result<Vec<Array2<f32>>> {
        if !self.options.aug_smooth {
            return self.single_pass(layer, inputs, targets);
        }

        let mut total: Option<Vec<Array2<f32>>> = None;
        let mut count = 0.0f32;
        for flip in [false, true] {
            for factor in AUG_FACTORS {
                let mut augmented = inputs.mapv(|v| v * factor);
                if flip {
                    augmented.invert_axis(Axis(3));
                }
                let mut maps = self.single_pass(layer, augmented.view(), targets)?;
                if flip {
                    maps = maps.iter().map(flip_horizontal).collect();
                }
                total = Some(match total {
                    None => maps,
                    Some(acc) => acc.into_iter().zip(maps).map(|(a, m)| a + m).collect(),
                });
                count += 1.0;
            }
        }
        Ok(total
            .unwrap_or_default()
            .into_iter()
            .map(|m| m / count)
            .collect())
    }

    fn single_pass(
        &self,
        layer: &str,
        inputs: ArrayView4<f32>,
        targets: &[TargetSpec],
    ) -> Result<Vec<Array2<f32>>> {
        let weighted = match self.method {
            CamMethod::GradCam
            | CamMethod::HiResCam
            | CamMethod::GradCamPlusPlus
            | CamMethod::XGradCam
            | CamMethod::LayerCam
            | CamMethod::EigenGradCam => {
                let capture = (self.gradients)(inputs, layer, targets)?;
                let grads = capture.gradients.ok_or_else(|| {
                    ExplainError::GradientsUnavailable(format!("layer '{}' produced no gradient", layer))
                })?;
                gradient_weighted(self.method, &capture.activations, &grads)?
            }
            CamMethod::EigenCam => self.activations(layer, inputs)?,
            CamMethod::AblationCam => {
                let acts = self.activations(layer, inputs)?;
                let weights = self.ablation_weights(layer, &acts, targets)?;
                apply_channel_weights(&acts, &weights)
            }
            CamMethod::ScoreCam => {
                let acts = self.activations(layer, inputs)?;
                let weights = self.score_weights(inputs, &acts, targets)?;
                apply_channel_weights(&acts, &weights)
            }
        };
        Ok(reduce_maps(
            &weighted,
            self.method.projects() || self.options.eigen_smooth,
        ))
    }

    fn activations(&self, layer: &str, inputs: ArrayView4<f32>) -> Result<Array4<f32>> {
        Ok(capture_activations::<B, M>(self.model, inputs, layer, self.device)?.activations)
    }

    /// Relative score drop when each channel is zeroed.
    fn ablation_weights(
        &self,
        layer: &str,
        acts: &Array4<f32>,
        targets: &[TargetSpec],
    ) -> Result<Array2<f32>> {
        let (n, c, _, _) = acts.dim();
        let original = scores_from::<B, M>(self.model, acts.view(), layer, targets, self.device)?;
        let mut weights = Array2::<f32>::zeros((n, c));
        let mut ablated = acts.clone();

        for ch in 0..c {
            ablated.slice_mut(s![.., ch, .., ..]).fill(0.0);
            let scores = scores_from::<B, M>(self.model, ablated.view(), layer, targets, self.device)?;
            for (i, (&orig, &score)) in original.iter().zip(&scores).enumerate() {
                weights[[i, ch]] = if orig != 0.0 { (orig - score) / orig } else { 0.0 };
            }
            ablated
                .slice_mut(s![.., ch, .., ..])
                .assign(&acts.slice(s![.., ch, .., ..]));
        }
        Ok(weights)
    }

    /// Softmax over channels of the score of the input masked by each channel.
    fn score_weights(
        &self,
        inputs: ArrayView4<f32>,
        acts: &Array4<f32>,
        targets: &[TargetSpec],
    ) -> Result<Array2<f32>> {
        let (n, c, _, _) = acts.dim();
        let (_, in_c, height, width) = inputs.dim();
        let mut scores = Array2::<f32>::zeros((n, c));
        let mut masked = Array4::<f32>::zeros(inputs.dim());

        for ch in 0..c {
            for i in 0..n {
                let up = resize_bilinear(acts.slice(s![i, ch, .., ..]), height, width)?;
                let lo = up.iter().copied().fold(f32::INFINITY, f32::min);
                let hi = up.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mask = if hi > lo {
                    up.mapv(|v| (v - lo) / (hi - lo))
                } else {
                    Array2::zeros((height, width))
                };
                for k in 0..in_c {
                    let plane = &inputs.slice(s![i, k, .., ..]) * &mask;
                    masked.slice_mut(s![i, k, .., ..]).assign(&plane);
                }
            }
            let channel_scores = forward_scores::<B, M>(self.model, masked.view(), targets, self.device)?;
            scores.column_mut(ch).assign(&Array1::from(channel_scores));
        }

        for mut row in scores.rows_mut() {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            if sum > 0.0 {
                row /= sum;
            }
        }
        Ok(scores)
    }
}
