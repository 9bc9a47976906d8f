//! # camlab_data
//!
//! Dataset and dataloader implementations for camlab.
//!
//! This crate provides:
//! - [`ImageDataset`] for storing fixed-shape images with optional labels
//! - [`ImageDataLoader`] for restartable batched iteration
//! - [`SamplerPolicy`] for sequential, shuffled and subset sampling
//! - Splitting helpers: [`train_test_split`], [`random_split_ratio`], [`k_fold_indices`]
//! - A reader for MNIST-style CSV files (feature `polars-io`, on by default)
//!
//! ## Example
//!
//! ```rust,ignore
//! use camlab_data::{read_mnist_csv, train_test_split, ImageDataLoader, SamplerPolicy};
//! use camlab_core::Seed;
//!
//! let full = read_mnist_csv("data/mnist_train.csv")?;
//! let (train, valid) = train_test_split(&full, 0.2, Seed::new(42))?;
//!
//! let train_loader = ImageDataLoader::builder(train)
//!     .batch_size(512)
//!     .policy(SamplerPolicy::shuffle(Seed::new(42)))
//!     .build()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod dataset;
mod error;
#[cfg(feature = "polars-io")]
mod io;
mod loader;
mod sampler;
mod splits;

pub use dataset::{ImageDataset, Record};
pub use error::{DataError, Result};
#[cfg(feature = "polars-io")]
pub use io::{parse_image_csv, read_image_csv, read_mnist_csv, MNIST_SHAPE};
pub use loader::{collate, ImageDataLoader, ImageDataLoaderBuilder, ImageDataLoaderIter};
pub use sampler::SamplerPolicy;
pub use splits::{k_fold_indices, random_split_ratio, train_test_split, Fold};
