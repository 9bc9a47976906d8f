//! # camlab_train
//!
//! Training and evaluation engines for camlab.
//!
//! This crate provides:
//! - [`train`] / [`train_with_callbacks`]: a generic epoch loop built from
//!   model, loss and optimizer factories
//! - [`evaluate`]: a sequential, inference-mode pass producing a
//!   [`ClassificationReport`](camlab_analysis::ClassificationReport)
//! - Losses ([`CrossEntropyLoss`]) and optimizer factories ([`adam`], [`sgd`])
//! - Callback hooks with a `tracing`-based [`ProgressCallback`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use camlab_train::{adam, evaluate, train, BatchConfig, CrossEntropyLoss, TrainerConfig};
//!
//! let config = TrainerConfig::new(10).with_learning_rate(1e-3).with_return_model(true);
//! let output = train::<B, _, _, _, _, _, _>(
//!     |device| CnnClassifierConfig::default().init(device).unwrap(),
//!     CrossEntropyLoss::new,
//!     adam::<B, CnnClassifier<B>>,
//!     &train_loader,
//!     &valid_loader,
//!     &config,
//!     &device,
//! )?;
//!
//! if let Some(model) = output.model {
//!     let report = evaluate::<B, _>(&test_set, &model, &device, &BatchConfig::default())?;
//!     println!("{}", report);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callback;
pub mod error;
pub mod evaluation;
pub mod losses;
pub mod optimizer;
pub mod training;

pub use callback::{
    BatchRecord, Callback, CallbackContext, CallbackList, HistoryCallback, ProgressCallback,
};
pub use error::{Result, TrainError};
pub use evaluation::{evaluate, evaluate_inner, predict_dataset, BatchConfig, EvaluationResult};
pub use losses::{ClassificationLoss, CrossEntropyLoss};
pub use optimizer::{adam, sgd, OptimizerOptions};
pub use training::{train, train_with_callbacks, TrainerConfig, TrainingOutput};
