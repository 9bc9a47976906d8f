//! # camlab_core
//!
//! Core types and traits shared by every camlab crate.
//!
//! This crate provides:
//! - [`Seed`] for deterministic random number generation
//! - [`ImageShape`] for per-record image shape metadata
//! - [`ImageBatch`] for collated batches living on a compute device
//! - [`ImageClassifier`], the model contract the trainer and the explainer rely on
//! - [`ForwardMode`] to switch models between training and inference behaviour
//! - [`DeviceSpec`] for explicit, fail-fast device selection
//!
//! ## Shape Convention
//!
//! Image batches follow the convention `(B, C, H, W)`:
//! - `B`: Batch size (number of samples)
//! - `C`: Channels (1 for grayscale)
//! - `H`, `W`: Spatial height and width
//!
//! ## Example
//!
//! ```rust,ignore
//! use camlab_core::{ImageShape, Seed};
//!
//! let seed = Seed::new(42);
//! let shape = ImageShape::grayscale(28, 28);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod device;
mod error;
mod mode;
mod model_trait;
mod seed;
mod shape;

pub use batch::ImageBatch;
pub use device::DeviceSpec;
pub use error::{CoreError, Result};
pub use mode::ForwardMode;
pub use model_trait::ImageClassifier;
pub use seed::Seed;
pub use shape::ImageShape;

/// Backend type aliases and device resolution for the compiled backends.
pub mod backend {
    #[cfg(any(feature = "backend-ndarray", feature = "backend-wgpu"))]
    pub use burn_autodiff::Autodiff;

    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::{NdArray, NdArrayDevice};

    #[cfg(feature = "backend-wgpu")]
    pub use burn_wgpu::{Wgpu, WgpuDevice};

    #[cfg(feature = "backend-ndarray")]
    pub use crate::device::resolve_ndarray;

    #[cfg(feature = "backend-wgpu")]
    pub use crate::device::resolve_wgpu;
}
