//! # camlab
//!
//! Train small image classifiers and explain them with class activation maps.
//!
//! - **Data**: image datasets, MNIST-style CSV reader, splits and dataloaders
//! - **Models**: a three-block CNN and a linear baseline with named stages
//! - **Training**: a factory-driven train loop and a sequential evaluator
//! - **Analysis**: classification reports and confusion matrices
//! - **Explainability**: Grad-CAM family saliency maps, overlays and figures
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use camlab::prelude::*;
//!
//! let dataset = read_mnist_csv("data/train.csv")?;
//! let (train_ds, valid_ds) = train_test_split(&dataset, 0.2, Seed::new(42))?;
//! let train_dl = ImageDataLoader::builder(train_ds).batch_size(64).shuffle(Some(Seed::new(42))).build()?;
//! let valid_dl = ImageDataLoader::builder(valid_ds.clone()).batch_size(256).build()?;
//!
//! let output = train::<B, _, _, _, _, _, _>(
//!     |device| CnnClassifierConfig::default().init(device).unwrap(),
//!     CrossEntropyLoss::new,
//!     adam::<B, CnnClassifier<B>>,
//!     &train_dl,
//!     &valid_dl,
//!     &TrainerConfig::new(10).with_return_model(true),
//!     &device,
//! )?;
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray
//! - `backend-wgpu`: GPU backend using WGPU

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub use camlab_analysis as analysis;
pub use camlab_core as core;
pub use camlab_data as data;
pub use camlab_explain as explain;
pub use camlab_models as models;
pub use camlab_train as train;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use camlab::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use camlab_core::{DeviceSpec, ForwardMode, ImageBatch, ImageClassifier, ImageShape, Seed};

    // Data
    pub use camlab_data::{
        k_fold_indices, random_split_ratio, read_image_csv, read_mnist_csv, train_test_split,
        ImageDataLoader, ImageDataset, SamplerPolicy,
    };

    // Models
    pub use camlab_models::{
        CnnClassifier, CnnClassifierConfig, LinearClassifier, LinearClassifierConfig, CNN_LAYERS,
    };

    // Training
    pub use camlab_train::{
        adam, evaluate, sgd, train, train_with_callbacks, BatchConfig, Callback, CallbackList,
        CrossEntropyLoss, OptimizerOptions, ProgressCallback, TrainerConfig, TrainingOutput,
    };

    // Analysis
    pub use camlab_analysis::{classification_report, confusion_matrix, ClassificationReport};

    // Explain
    pub use camlab_explain::{
        compute_saliency, explain, CamMethod, CamOptions, SaliencyFigure, TargetKind,
        TargetSelection, TargetSpec,
    };
}
