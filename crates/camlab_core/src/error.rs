//! Error types for camlab_core.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur in camlab_core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid tensor shape provided.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// Shape mismatch between tensors.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A layer name that the model does not expose.
    #[error("Unknown layer '{name}', available layers: {available:?}")]
    UnknownLayer {
        /// Requested layer name.
        name: String,
        /// Layers the model exposes.
        available: Vec<String>,
    },

    /// A device string that does not name a device.
    #[error("Invalid device '{spec}': {reason}")]
    InvalidDevice {
        /// The string as given.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The requested compute device is not available in this build.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Tensor data could not be read back to the host.
    #[error("Tensor data error: {0}")]
    TensorData(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Build an [`CoreError::UnknownLayer`] from a name and the model's layer list.
    pub fn unknown_layer(name: &str, available: &[&str]) -> Self {
        Self::UnknownLayer {
            name: name.to_string(),
            available: available.iter().map(|s| s.to_string()).collect(),
        }
    }
}
