//! # camlab_explain
//!
//! Class activation maps for camlab classifiers.
//!
//! This crate provides:
//! - Activation and gradient capture at named model stages
//! - The CAM family ([`CamMethod`]): gradient-based, ablation, score and
//!   principal component methods
//! - [`compute_saliency`], returning `[0, 1]` maps at each layer's resolution
//! - [`explain`], which samples a dataset and assembles [`SaliencyFigure`]s
//!   (inputs, maps, jet overlays) drawn to PNG with plotters, plus JSON captions
//!
//! ## Example
//!
//! ```rust,ignore
//! use camlab_explain::{explain, CamMethod, CamOptions, TargetSelection};
//!
//! let figures = explain::<B, _>(
//!     &model,
//!     CamMethod::GradCam,
//!     &["cnn_block2", "cnn_block3"],
//!     &TargetSelection::Predicted,
//!     &test_set,
//!     8,
//!     &CamOptions::default(),
//!     &device,
//! )?;
//! for figure in &figures {
//!     figure.save("out", 4)?;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cam;
pub mod capture;
mod error;
mod explainer;
pub mod figure;
pub mod image;
mod target;

pub use cam::CamMethod;
pub use capture::{capture_activations, capture_gradients, LayerCapture};
pub use error::{ExplainError, Result};
pub use explainer::{
    build_figures, compute_saliency, compute_saliency_inner, explain, sample_indices, CamOptions,
    LayerSaliency,
};
pub use figure::{ColumnCaption, FigureCaptions, FigureColumn, SaliencyFigure, FIGURE_ROWS};
pub use image::RgbImage;
pub use target::{TargetKind, TargetSelection, TargetSpec};
