//! Model evaluation utilities.
//!
//! Evaluation always walks the dataset in order, in inference mode, on a
//! gradient-free model, and never mutates the model it is given.

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use camlab_analysis::{classification_report, confusion_matrix, ClassificationReport, ConfusionMatrix};
use camlab_core::{ForwardMode, ImageClassifier};
use camlab_data::{collate, ImageDataset};

use crate::error::{Result, TrainError};

/// Batching used when evaluating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of records per forward pass.
    pub batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { batch_size: 512 }
    }
}

impl BatchConfig {
    /// Create a config with the given batch size.
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }
}

/// Raw outputs of a prediction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Predicted class indices, in dataset order.
    pub predictions: Vec<usize>,
    /// True class indices, if the dataset is labeled.
    pub targets: Option<Vec<usize>>,
    /// Softmax probabilities (n_samples × n_classes).
    pub probabilities: Vec<Vec<f32>>,
}

impl EvaluationResult {
    /// Number of evaluated samples.
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// Whether no sample was evaluated.
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// Fraction of correct predictions, if labeled.
    pub fn accuracy(&self) -> Option<f32> {
        let targets = self.targets.as_ref()?;
        if targets.is_empty() {
            return Some(0.0);
        }
        let correct = self
            .predictions
            .iter()
            .zip(targets)
            .filter(|(p, t)| p == t)
            .count();
        Some(correct as f32 / targets.len() as f32)
    }

    /// Classification report over the observed labels.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::MissingTargets`] for unlabeled results.
    pub fn report(&self) -> Result<ClassificationReport> {
        let targets = self.targets.as_ref().ok_or(TrainError::MissingTargets)?;
        Ok(classification_report(&self.predictions, targets, None)?)
    }

    /// Confusion matrix with at least `n_classes` rows.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::MissingTargets`] for unlabeled results.
    pub fn confusion_matrix(&self, n_classes: usize) -> Result<ConfusionMatrix> {
        let targets = self.targets.as_ref().ok_or(TrainError::MissingTargets)?;
        Ok(confusion_matrix(&self.predictions, targets, Some(n_classes))?)
    }
}

/// Evaluate a trained (autodiff) model on a labeled dataset.
///
/// The model is borrowed; its gradient-free inner module is evaluated in
/// [`ForwardMode::Inference`]. Prediction is the arg-max of the softmax of
/// the logits.
///
/// # Errors
///
/// Returns an error if the dataset is unlabeled, the batch size is zero,
/// or the model and dataset disagree on the record shape.
pub fn evaluate<B, M>(
    dataset: &ImageDataset,
    model: &M,
    device: &B::Device,
    batch_config: &BatchConfig,
) -> Result<ClassificationReport>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    evaluate_inner::<B::InnerBackend, _>(dataset, &model.valid(), device, batch_config)
}

/// Evaluate a model that already lives on a non-autodiff backend.
///
/// # Errors
///
/// See [`evaluate`].
pub fn evaluate_inner<B, M>(
    dataset: &ImageDataset,
    model: &M,
    device: &B::Device,
    batch_config: &BatchConfig,
) -> Result<ClassificationReport>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    if !dataset.has_targets() {
        return Err(TrainError::MissingTargets);
    }
    let result = predict_dataset::<B, M>(dataset, model, device, batch_config)?;
    let report = result.report()?;

    tracing::info!(
        n_samples = result.len(),
        accuracy = report.accuracy,
        "Evaluation finished"
    );
    Ok(report)
}

/// Predict every record of a dataset, in order.
///
/// # Errors
///
/// Returns an error if the batch size is zero or the model and dataset
/// disagree on the record shape.
pub fn predict_dataset<B, M>(
    dataset: &ImageDataset,
    model: &M,
    device: &B::Device,
    batch_config: &BatchConfig,
) -> Result<EvaluationResult>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    if batch_config.batch_size == 0 {
        return Err(TrainError::InvalidConfig(
            "batch size must be greater than 0".to_string(),
        ));
    }
    if model.input_shape() != dataset.image_shape() {
        return Err(TrainError::ShapeMismatch {
            expected: model.input_shape(),
            got: dataset.image_shape(),
        });
    }

    let n_classes = model.n_classes();
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut predictions = Vec::with_capacity(dataset.len());
    let mut probabilities = Vec::with_capacity(dataset.len());

    for chunk in indices.chunks(batch_config.batch_size) {
        let batch = collate::<B>(dataset, chunk, device)?;
        let logits = model.forward(batch.x, ForwardMode::Inference);
        let probs: Vec<f32> = softmax(logits, 1)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| TrainError::TensorData(format!("{:?}", e)))?;

        for row in probs.chunks(n_classes) {
            predictions.push(argmax(row));
            probabilities.push(row.to_vec());
        }
    }

    Ok(EvaluationResult {
        predictions,
        targets: dataset.labels().map(<[usize]>::to_vec),
        probabilities,
    })
}

/// Index of the largest value; the first one wins ties.
fn argmax(row: &[f32]) -> usize {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use camlab_core::backend::{Autodiff, NdArray};
    use camlab_core::ImageShape;
    use camlab_models::{CnnClassifierConfig, LinearClassifierConfig};
    use ndarray::Array4;

    type B = Autodiff<NdArray>;

    fn dataset(n: usize, shape: ImageShape) -> ImageDataset {
        let x = Array4::from_shape_fn(
            (n, shape.channels(), shape.height(), shape.width()),
            |(i, _, h, w)| ((i + h * w) % 5) as f32 / 5.0,
        );
        ImageDataset::from_arrays(x, Some((0..n).map(|i| i % 3).collect())).unwrap()
    }

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let device = Default::default();
        let shape = ImageShape::grayscale(12, 12);
        let model = CnnClassifierConfig::new(shape, 3)
            .with_filters(2, 3, 4)
            .init::<B>(&device)
            .unwrap();
        let ds = dataset(17, shape);

        let first = evaluate::<B, _>(&ds, &model, &device, &BatchConfig::new(5)).unwrap();
        let second = evaluate::<B, _>(&ds, &model, &device, &BatchConfig::new(5)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_samples, 17);
    }

    #[test]
    fn test_batch_size_does_not_change_predictions() {
        let device = Default::default();
        let shape = ImageShape::grayscale(4, 4);
        let model = LinearClassifierConfig::new(shape, 3).init::<NdArray>(&device);
        let ds = dataset(11, shape);

        let a = predict_dataset::<NdArray, _>(&ds, &model, &device, &BatchConfig::new(2)).unwrap();
        let b = predict_dataset::<NdArray, _>(&ds, &model, &device, &BatchConfig::new(11)).unwrap();
        assert_eq!(a.predictions, b.predictions);
        assert_eq!(a.len(), 11);
        for row in &a.probabilities {
            assert_relative_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
        assert_eq!(a.report().unwrap().accuracy, a.accuracy().unwrap());
    }

    #[test]
    fn test_evaluate_rejects_bad_input() {
        let device = Default::default();
        let shape = ImageShape::grayscale(4, 4);
        let model = LinearClassifierConfig::new(shape, 3).init::<B>(&device);

        let unlabeled = ImageDataset::from_arrays(Array4::zeros((3, 1, 4, 4)), None).unwrap();
        assert!(matches!(
            evaluate::<B, _>(&unlabeled, &model, &device, &BatchConfig::default()),
            Err(TrainError::MissingTargets)
        ));

        let wrong_shape = dataset(3, ImageShape::grayscale(5, 5));
        assert!(matches!(
            evaluate::<B, _>(&wrong_shape, &model, &device, &BatchConfig::default()),
            Err(TrainError::ShapeMismatch { .. })
        ));

        let ds = dataset(3, shape);
        assert!(evaluate::<B, _>(&ds, &model, &device, &BatchConfig::new(0)).is_err());
    }

    #[test]
    fn test_predict_unlabeled() {
        let device = Default::default();
        let shape = ImageShape::grayscale(4, 4);
        let model = LinearClassifierConfig::new(shape, 2).init::<NdArray>(&device);
        let unlabeled = ImageDataset::from_arrays(Array4::zeros((3, 1, 4, 4)), None).unwrap();

        let result = predict_dataset::<NdArray, _>(&unlabeled, &model, &device, &BatchConfig::default()).unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.targets.is_none());
        assert!(result.accuracy().is_none());
        assert!(result.report().is_err());
    }
}
