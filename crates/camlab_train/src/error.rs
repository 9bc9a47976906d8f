//! Error types for training and evaluation.

use thiserror::Error;

use camlab_core::ImageShape;

/// Result type alias for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors that can occur during training or evaluation.
#[derive(Error, Debug)]
pub enum TrainError {
    /// Invalid trainer or evaluation configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid learning rate.
    #[error("Invalid learning rate: {0}")]
    InvalidLearningRate(f64),

    /// The model and the data disagree on the record shape.
    #[error("Shape mismatch: model expects {expected}, data provides {got}")]
    ShapeMismatch {
        /// Shape declared by the model.
        expected: ImageShape,
        /// Shape of the dataset records.
        got: ImageShape,
    },

    /// Labels are required but the dataset has none.
    #[error("Dataset has no labels")]
    MissingTargets,

    /// Tensor data could not be read back to the host.
    #[error("Tensor data error: {0}")]
    TensorData(String),

    /// Callback error.
    #[error("Callback error: {0}")]
    CallbackError(String),

    /// Data error.
    #[error("Data error: {0}")]
    DataError(#[from] camlab_data::DataError),

    /// Core error.
    #[error("Core error: {0}")]
    CoreError(#[from] camlab_core::CoreError),

    /// Metric computation error.
    #[error("Analysis error: {0}")]
    AnalysisError(#[from] camlab_analysis::AnalysisError),
}
