//! Error types for camlab_data.

use thiserror::Error;

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur in data operations.
#[derive(Error, Debug)]
pub enum DataError {
    /// Invalid data shape.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Empty dataset.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Index out of bounds.
    #[error("Index {index} out of bounds for length {length}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The length of the collection.
        length: usize,
    },

    /// Batch size error.
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// Split error.
    #[error("Split error: {0}")]
    SplitError(String),

    /// A row of a data file could not be parsed.
    #[error("Format error at line {line}: {message}")]
    Format {
        /// 1-based line number in the source file.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// The CSV reader rejected the input.
    #[error("CSV error: {0}")]
    Csv(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] camlab_core::CoreError),
}
