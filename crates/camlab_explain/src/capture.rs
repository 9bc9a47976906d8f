//! Activation and gradient capture at a named stage.
//!
//! Captures rely on the split forward pass of [`ImageClassifier`]: the
//! activation of a stage is computed, detached and marked as a leaf, then
//! the rest of the network runs from it so the target score can be
//! differentiated with respect to the activation alone.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::{Array4, ArrayView4};

use camlab_core::{ForwardMode, ImageClassifier};

use crate::error::{ExplainError, Result};
use crate::target::{host_scores, target_score, TargetSpec};

/// Host copies of a stage's activations and of the target gradient.
#[derive(Debug, Clone)]
pub struct LayerCapture {
    /// Stage name.
    pub layer: String,
    /// Activations `(N, C, h, w)`.
    pub activations: Array4<f32>,
    /// Gradient of the summed target scores w.r.t. the activations, if taken.
    pub gradients: Option<Array4<f32>>,
}

/// Upload a host batch.
pub(crate) fn to_tensor<B: Backend>(values: ArrayView4<f32>, device: &B::Device) -> Tensor<B, 4> {
    let (n, c, h, w) = values.dim();
    let data: Vec<f32> = values.iter().copied().collect();
    Tensor::from_data(TensorData::new(data, [n, c, h, w]), device)
}

/// Download a tensor as a flat `f32` buffer.
pub(crate) fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| ExplainError::TensorData(format!("{:?}", e)))
}

/// Download a rank-4 tensor.
pub(crate) fn to_array4<B: Backend>(tensor: Tensor<B, 4>) -> Result<Array4<f32>> {
    let [n, c, h, w] = tensor.dims();
    let values = to_vec(tensor)?;
    Array4::from_shape_vec((n, c, h, w), values).map_err(|e| ExplainError::TensorData(e.to_string()))
}

/// Activations of `layer` without gradients.
pub fn capture_activations<B, M>(
    model: &M,
    inputs: ArrayView4<f32>,
    layer: &str,
    device: &B::Device,
) -> Result<LayerCapture>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let x = to_tensor::<B>(inputs, device);
    let activations = model.forward_features(x, layer, ForwardMode::Inference)?;
    Ok(LayerCapture {
        layer: layer.to_string(),
        activations: to_array4(activations)?,
        gradients: None,
    })
}

/// Activations of `layer` and the gradient of the summed target scores.
///
/// # Errors
///
/// Returns [`ExplainError::GradientsUnavailable`] when the backend does not
/// track gradients or the stage received no gradient.
pub fn capture_gradients<B, M>(
    model: &M,
    inputs: ArrayView4<f32>,
    layer: &str,
    targets: &[TargetSpec],
    device: &B::Device,
) -> Result<LayerCapture>
where
    B: AutodiffBackend,
    M: ImageClassifier<B>,
{
    if !B::ad_enabled() {
        return Err(ExplainError::GradientsUnavailable(
            "backend does not track gradients".to_string(),
        ));
    }

    let x = to_tensor::<B>(inputs, device);
    let activations = model
        .forward_features(x, layer, ForwardMode::Inference)?
        .detach()
        .require_grad();
    let logits = model.forward_from(activations.clone(), layer, ForwardMode::Inference)?;
    let grads = target_score(logits, targets).backward();

    let gradient = activations.grad(&grads).ok_or_else(|| {
        ExplainError::GradientsUnavailable(format!("layer '{}' produced no gradient", layer))
    })?;

    Ok(LayerCapture {
        layer: layer.to_string(),
        activations: to_array4(activations.inner())?,
        gradients: Some(to_array4(gradient)?),
    })
}

/// Target scores of a full forward pass.
pub(crate) fn forward_scores<B, M>(
    model: &M,
    inputs: ArrayView4<f32>,
    targets: &[TargetSpec],
    device: &B::Device,
) -> Result<Vec<f32>>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let logits = model.forward(to_tensor::<B>(inputs, device), ForwardMode::Inference);
    let values = to_vec(logits)?;
    Ok(host_scores(&values, model.n_classes(), targets))
}

/// Target scores of the network continued from stage activations.
pub(crate) fn scores_from<B, M>(
    model: &M,
    activations: ArrayView4<f32>,
    layer: &str,
    targets: &[TargetSpec],
    device: &B::Device,
) -> Result<Vec<f32>>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let logits = model.forward_from(to_tensor::<B>(activations, device), layer, ForwardMode::Inference)?;
    let values = to_vec(logits)?;
    Ok(host_scores(&values, model.n_classes(), targets))
}

/// Arg-max class of each input; the first index wins ties.
pub(crate) fn predicted_classes<B, M>(
    model: &M,
    inputs: ArrayView4<f32>,
    device: &B::Device,
) -> Result<Vec<usize>>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let logits = model.forward(to_tensor::<B>(inputs, device), ForwardMode::Inference);
    let values = to_vec(logits)?;
    let classes = values
        .chunks(model.n_classes().max(1))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, best_v), (i, &v)| {
                    if v > best_v {
                        (i, v)
                    } else {
                        (best, best_v)
                    }
                })
                .0
        })
        .collect();
    Ok(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlab_core::backend::{Autodiff, NdArray};
    use camlab_core::ImageShape;
    use camlab_models::CnnClassifierConfig;

    type B = Autodiff<NdArray>;

    fn inputs(n: usize) -> Array4<f32> {
        Array4::from_shape_fn((n, 1, 12, 12), |(i, _, h, w)| ((i * 7 + h * 3 + w) % 11) as f32 / 10.0)
    }

    #[test]
    fn test_round_trip_through_tensor() {
        let device = Default::default();
        let x = inputs(2);
        let back = to_array4(to_tensor::<NdArray>(x.view(), &device)).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn test_capture_gradients_shapes() {
        let device = Default::default();
        let model = CnnClassifierConfig::new(ImageShape::grayscale(12, 12), 3)
            .with_filters(2, 3, 4)
            .init::<B>(&device)
            .unwrap();
        let x = inputs(2);
        let targets = [TargetSpec::Logit(0), TargetSpec::Softmax(2)];

        let capture = capture_gradients::<B, _>(&model, x.view(), "cnn_block2", &targets, &device).unwrap();
        let grads = capture.gradients.unwrap();
        assert_eq!(capture.activations.dim(), (2, 3, 3, 3));
        assert_eq!(grads.dim(), capture.activations.dim());
        assert!(grads.iter().all(|g| g.is_finite()));
        assert!(grads.iter().any(|&g| g != 0.0));

        let plain = capture_activations::<B, _>(&model, x.view(), "cnn_block2", &device).unwrap();
        assert!(plain.gradients.is_none());
        assert_eq!(plain.activations, capture.activations);
    }

    #[test]
    fn test_capture_unknown_layer() {
        let device = Default::default();
        let model = CnnClassifierConfig::new(ImageShape::grayscale(12, 12), 3)
            .with_filters(2, 3, 4)
            .init::<B>(&device)
            .unwrap();
        let result = capture_gradients::<B, _>(&model, inputs(1).view(), "fc", &[TargetSpec::Logit(0)], &device);
        assert!(matches!(result, Err(ExplainError::Core(_))));
    }
}
