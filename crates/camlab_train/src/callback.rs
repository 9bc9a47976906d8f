//! Callback system for training hooks.
//!
//! Callbacks observe the training loop; they cannot alter it. Progress
//! reporting goes through [`ProgressCallback`], which logs with `tracing`.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Context passed to callbacks containing training state.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    /// Current epoch (0-indexed).
    pub epoch: usize,
    /// Total number of epochs.
    pub n_epochs: usize,
    /// Current batch (0-indexed).
    pub batch: usize,
    /// Total number of training batches per epoch.
    pub n_batches: usize,
    /// Learning rate.
    pub lr: f64,
    /// Loss of the last training batch.
    pub batch_loss: Option<f32>,
    /// Average training loss of the epoch, once finished.
    pub train_loss: Option<f32>,
    /// Average validation loss of the epoch, once finished.
    pub valid_loss: Option<f32>,
}

impl CallbackContext {
    /// Create a new callback context.
    pub fn new(n_epochs: usize, n_batches: usize, lr: f64) -> Self {
        Self {
            epoch: 0,
            n_epochs,
            batch: 0,
            n_batches,
            lr,
            batch_loss: None,
            train_loss: None,
            valid_loss: None,
        }
    }

    /// Get progress as a fraction (0.0 to 1.0).
    pub fn progress(&self) -> f32 {
        let total_batches = self.n_epochs * self.n_batches;
        if total_batches == 0 {
            return 0.0;
        }
        let current = self.epoch * self.n_batches + self.batch;
        current as f32 / total_batches as f32
    }
}

/// Trait for training callbacks.
pub trait Callback: Send + Sync {
    /// Called before training starts.
    fn before_fit(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called after training completes.
    fn after_fit(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called before each epoch.
    fn before_epoch(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called after both phases of an epoch.
    fn after_epoch(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Called after each training batch.
    fn after_batch(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    /// Get the callback name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A list of callbacks.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackList {
    /// Create a new empty callback list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback.
    pub fn add<C: Callback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    /// Add a callback, builder style.
    #[must_use]
    pub fn with<C: Callback + 'static>(mut self, callback: C) -> Self {
        self.add(callback);
        self
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Call before_fit on all callbacks.
    pub fn before_fit(&mut self, ctx: &CallbackContext) -> Result<()> {
        self.callbacks.iter_mut().try_for_each(|cb| cb.before_fit(ctx))
    }

    /// Call after_fit on all callbacks.
    pub fn after_fit(&mut self, ctx: &CallbackContext) -> Result<()> {
        self.callbacks.iter_mut().try_for_each(|cb| cb.after_fit(ctx))
    }

    /// Call before_epoch on all callbacks.
    pub fn before_epoch(&mut self, ctx: &CallbackContext) -> Result<()> {
        self.callbacks.iter_mut().try_for_each(|cb| cb.before_epoch(ctx))
    }

    /// Call after_epoch on all callbacks.
    pub fn after_epoch(&mut self, ctx: &CallbackContext) -> Result<()> {
        self.callbacks.iter_mut().try_for_each(|cb| cb.after_epoch(ctx))
    }

    /// Call after_batch on all callbacks.
    pub fn after_batch(&mut self, ctx: &CallbackContext) -> Result<()> {
        self.callbacks.iter_mut().try_for_each(|cb| cb.after_batch(ctx))
    }
}

/// Progress callback logging batch and epoch losses.
pub struct ProgressCallback {
    log_every: usize,
}

impl ProgressCallback {
    /// Create a new progress callback.
    ///
    /// Batch losses are logged at debug level every `log_every` batches
    /// (0 = never).
    pub fn new(log_every: usize) -> Self {
        Self { log_every }
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Callback for ProgressCallback {
    fn before_fit(&mut self, ctx: &CallbackContext) -> Result<()> {
        tracing::info!(
            "Starting training for {} epochs ({} batches/epoch, lr={})",
            ctx.n_epochs,
            ctx.n_batches,
            ctx.lr
        );
        Ok(())
    }

    fn after_batch(&mut self, ctx: &CallbackContext) -> Result<()> {
        if self.log_every > 0 && (ctx.batch + 1) % self.log_every == 0 {
            if let Some(loss) = ctx.batch_loss {
                tracing::debug!(
                    "Epoch {} batch {}/{}: loss={:.4}",
                    ctx.epoch + 1,
                    ctx.batch + 1,
                    ctx.n_batches,
                    loss
                );
            }
        }
        Ok(())
    }

    fn after_epoch(&mut self, ctx: &CallbackContext) -> Result<()> {
        let train_loss = ctx.train_loss.map(|l| format!("{:.4}", l)).unwrap_or_default();
        let valid_loss = ctx.valid_loss.map(|l| format!("{:.4}", l)).unwrap_or_default();

        tracing::info!(
            "Epoch {}/{}: train_loss={}, valid_loss={}",
            ctx.epoch + 1,
            ctx.n_epochs,
            train_loss,
            valid_loss
        );
        Ok(())
    }

    fn after_fit(&mut self, _ctx: &CallbackContext) -> Result<()> {
        tracing::info!("Training completed");
        Ok(())
    }

    fn name(&self) -> &str {
        "ProgressCallback"
    }
}

/// Per-batch record kept by [`HistoryCallback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Epoch (0-indexed).
    pub epoch: usize,
    /// Batch within the epoch (0-indexed).
    pub batch: usize,
    /// Mean loss of the batch.
    pub loss: f32,
}

/// Callback recording every training batch loss.
///
/// Epoch averages are already returned by `train`; this keeps the finer
/// grained curve. Read it back through a shared handle:
///
/// ```rust,ignore
/// let history = HistoryCallback::default();
/// let handle = history.handle();
/// let mut callbacks = CallbackList::new().with(history);
/// train_with_callbacks(..., &mut callbacks)?;
/// let batches = handle.lock().unwrap().clone();
/// ```
#[derive(Default)]
pub struct HistoryCallback {
    records: Arc<Mutex<Vec<BatchRecord>>>,
}

impl HistoryCallback {
    /// Shared handle on the recorded batches.
    pub fn handle(&self) -> Arc<Mutex<Vec<BatchRecord>>> {
        Arc::clone(&self.records)
    }
}

impl Callback for HistoryCallback {
    fn before_fit(&mut self, _ctx: &CallbackContext) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
        Ok(())
    }

    fn after_batch(&mut self, ctx: &CallbackContext) -> Result<()> {
        if let (Some(loss), Ok(mut records)) = (ctx.batch_loss, self.records.lock()) {
            records.push(BatchRecord {
                epoch: ctx.epoch,
                batch: ctx.batch,
                loss,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "HistoryCallback"
    }
}
