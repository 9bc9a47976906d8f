//! Error types for camlab_explain.

use camlab_core::{CoreError, ImageShape};
use camlab_data::DataError;
use thiserror::Error;

/// Result type alias using [`ExplainError`].
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Errors raised while computing or rendering saliency maps.
#[derive(Error, Debug)]
pub enum ExplainError {
    /// No target layer was requested.
    #[error("At least one target layer is required")]
    EmptyLayers,

    /// Nothing to explain.
    #[error("Sample count must be greater than 0")]
    ZeroSamples,

    /// A target class outside the model's outputs.
    #[error("Target class {class} out of range for a model with {n_classes} classes")]
    TargetOutOfRange {
        /// Requested class.
        class: usize,
        /// Number of model outputs.
        n_classes: usize,
    },

    /// Per-sample targets that do not line up with the inputs.
    #[error("Expected 1 or {expected} per-sample targets, got {got}")]
    TargetCountMismatch {
        /// Number of samples.
        expected: usize,
        /// Number of targets given.
        got: usize,
    },

    /// The inputs do not have the shape the model expects.
    #[error("Input shape mismatch: model expects {expected}, got {got}")]
    ShapeMismatch {
        /// Model input shape.
        expected: ImageShape,
        /// Input shape given.
        got: ImageShape,
    },

    /// A gradient method was requested without gradient tracking.
    #[error("Gradients unavailable: {0}")]
    GradientsUnavailable(String),

    /// Invalid option value.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Tensor data could not be moved to or from the host.
    #[error("Tensor data error: {0}")]
    TensorData(String),

    /// Drawing a figure failed.
    #[error("Render error: {0}")]
    Render(String),

    /// Figure export failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caption serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the data layer.
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Error from the model layer, such as an unknown layer name.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}
