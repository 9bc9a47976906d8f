//! Collated image batches.

use burn::prelude::*;

use crate::error::{CoreError, Result};
use crate::shape::ImageShape;

/// A batch of images with optional class labels.
///
/// This is the structure produced by dataloaders and consumed by the
/// training and evaluation loops.
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// Input tensor (B, C, H, W).
    pub x: Tensor<B, 4>,

    /// Optional class indices (B).
    pub y: Option<Tensor<B, 1, Int>>,

    /// Dataset indices of the records in this batch, in batch order.
    pub indices: Vec<usize>,
}

impl<B: Backend> ImageBatch<B> {
    /// Create a batch with just input data.
    pub fn new(x: Tensor<B, 4>, indices: Vec<usize>) -> Result<Self> {
        let batch = x.dims()[0];
        if batch != indices.len() {
            return Err(CoreError::ShapeMismatch(format!(
                "x batch size {} != number of indices {}",
                batch,
                indices.len()
            )));
        }
        Ok(Self { x, y: None, indices })
    }

    /// Create a batch with inputs and labels.
    pub fn with_target(x: Tensor<B, 4>, y: Tensor<B, 1, Int>, indices: Vec<usize>) -> Result<Self> {
        let x_batch = x.dims()[0];
        let y_batch = y.dims()[0];

        if x_batch != y_batch {
            return Err(CoreError::ShapeMismatch(format!(
                "x batch size {} != y batch size {}",
                x_batch, y_batch
            )));
        }

        let mut batch = Self::new(x, indices)?;
        batch.y = Some(y);
        Ok(batch)
    }

    /// Get the batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.x.dims()[0]
    }

    /// Shape of one record in the batch.
    #[must_use]
    pub fn image_shape(&self) -> ImageShape {
        let [_, c, h, w] = self.x.dims();
        ImageShape::new(c, h, w)
    }

    /// Get the device.
    pub fn device(&self) -> B::Device {
        self.x.device()
    }

    /// Move the batch to a device.
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            x: self.x.to_device(device),
            y: self.y.map(|y| y.to_device(device)),
            indices: self.indices,
        }
    }
}
