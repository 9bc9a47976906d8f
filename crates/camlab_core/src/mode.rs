//! Forward pass modes.

use serde::{Deserialize, Serialize};

/// Behaviour of a model during a forward pass.
///
/// Burn selects batch-norm statistics from the backend (autodiff or not),
/// which is not enough for saliency: explanations need gradients *and*
/// frozen normalization. Models therefore take the mode explicitly.
///
/// ```rust
/// use camlab_core::ForwardMode;
///
/// assert!(ForwardMode::Train.is_train());
/// assert!(!ForwardMode::Inference.is_train());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ForwardMode {
    /// Batch statistics are used and updated, dropout is active.
    #[default]
    Train,
    /// Running statistics are used, dropout is disabled.
    Inference,
}

impl ForwardMode {
    /// Check if this is the training mode.
    #[must_use]
    pub const fn is_train(&self) -> bool {
        matches!(self, ForwardMode::Train)
    }

    /// Check if this is the inference mode.
    #[must_use]
    pub const fn is_inference(&self) -> bool {
        matches!(self, ForwardMode::Inference)
    }
}

impl std::fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardMode::Train => write!(f, "train"),
            ForwardMode::Inference => write!(f, "inference"),
        }
    }
}
