//! # camlab_models
//!
//! Image classifiers implementing [`camlab_core::ImageClassifier`].
//!
//! - [`CnnClassifier`] - three conv blocks (`cnn_block1..3`) and a linear head
//! - [`LinearClassifier`] - one linear layer over flattened pixels
//!
//! Every model exposes its feature stages by name so the explainer can
//! split the forward pass at any of them.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cnn;
pub mod linear;

pub use cnn::{CnnClassifier, CnnClassifierConfig, ConvBlock, CNN_LAYERS};
pub use linear::{LinearClassifier, LinearClassifierConfig, INPUT_LAYER};
