//! Error types for camlab_analysis.

use thiserror::Error;

/// Result type alias using [`AnalysisError`].
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur when computing metrics.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AnalysisError {
    /// Predictions and targets differ in length.
    #[error("Length mismatch: {predictions} predictions vs {targets} targets")]
    LengthMismatch {
        /// Number of predictions.
        predictions: usize,
        /// Number of targets.
        targets: usize,
    },
}
