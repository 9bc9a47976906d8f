//! # camlab_analysis
//!
//! Classification metrics for camlab, computed from plain label slices.
//!
//! - [`classification_report`] - per-class precision, recall, F1 and support
//!   with accuracy, macro and weighted averages
//! - [`confusion_matrix`] - counts of (true, predicted) pairs
//!
//! Undefined ratios (a class never predicted, never present) resolve to 0.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod confusion;
mod error;
mod report;

pub use confusion::{confusion_matrix, ConfusionMatrix};
pub use error::{AnalysisError, Result};
pub use report::{classification_report, ClassMetrics, ClassificationReport};
