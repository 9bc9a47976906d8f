//! Dataloader implementations for batched iteration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use burn::prelude::*;
use burn::tensor::TensorData;

use camlab_core::{ImageBatch, ImageShape, Seed};

use crate::dataset::ImageDataset;
use crate::error::{DataError, Result};
use crate::sampler::SamplerPolicy;

/// A dataloader that produces batches from a dataset.
///
/// The loader is restartable: every call to [`iter`](ImageDataLoader::iter)
/// starts a new pass. Shuffled policies draw a new, seed-derived order for
/// each pass.
///
/// # Example
///
/// ```rust,ignore
/// use camlab_data::{ImageDataset, ImageDataLoader, SamplerPolicy};
/// use camlab_core::Seed;
///
/// let loader = ImageDataLoader::builder(dataset)
///     .batch_size(512)
///     .policy(SamplerPolicy::shuffle(Seed::new(42)))
///     .build()?;
///
/// for batch in loader.iter::<B>(&device) {
///     let batch = batch?;
///     // process batch
/// }
/// ```
#[derive(Debug)]
pub struct ImageDataLoader {
    dataset: Arc<ImageDataset>,
    batch_size: usize,
    drop_last: bool,
    policy: SamplerPolicy,
    passes: AtomicUsize,
}

impl ImageDataLoader {
    /// Create a new dataloader builder.
    #[must_use]
    pub fn builder(dataset: impl Into<Arc<ImageDataset>>) -> ImageDataLoaderBuilder {
        ImageDataLoaderBuilder::new(dataset.into())
    }

    /// Get the dataset.
    #[must_use]
    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    /// Get the batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get the sampling policy.
    #[must_use]
    pub fn policy(&self) -> &SamplerPolicy {
        &self.policy
    }

    /// Shape of one record.
    #[must_use]
    pub fn image_shape(&self) -> ImageShape {
        self.dataset.image_shape()
    }

    /// Get the number of batches per pass.
    #[must_use]
    pub fn n_batches(&self) -> usize {
        let n = self.policy.len(self.dataset.len());
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Number of samples visited per pass.
    ///
    /// This is the size of the sampling policy (the subset length when an
    /// index subset is used), minus the trailing partial batch when
    /// `drop_last` is set. Average losses divide by this value.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        let n = self.policy.len(self.dataset.len());
        if self.drop_last {
            (n / self.batch_size) * self.batch_size
        } else {
            n
        }
    }

    /// Create an iterator over the batches of a new pass.
    ///
    /// # Type Parameters
    ///
    /// * `B` - The Burn backend to use for tensors
    #[must_use]
    pub fn iter<B: Backend>(&self, device: &B::Device) -> ImageDataLoaderIter<'_, B> {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        ImageDataLoaderIter::new(self, pass, device.clone())
    }
}

/// Builder for [`ImageDataLoader`].
#[derive(Debug)]
pub struct ImageDataLoaderBuilder {
    dataset: Arc<ImageDataset>,
    batch_size: usize,
    drop_last: bool,
    policy: SamplerPolicy,
}

impl ImageDataLoaderBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(dataset: Arc<ImageDataset>) -> Self {
        Self {
            dataset,
            batch_size: 32,
            drop_last: false,
            policy: SamplerPolicy::Sequential,
        }
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable dropping the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Set the sampling policy.
    #[must_use]
    pub fn policy(mut self, policy: SamplerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shorthand for a shuffled (`Some`) or sequential (`None`) policy.
    #[must_use]
    pub fn shuffle(self, seed: Option<Seed>) -> Self {
        match seed {
            Some(seed) => self.policy(SamplerPolicy::shuffle(seed)),
            None => self.policy(SamplerPolicy::Sequential),
        }
    }

    /// Build the dataloader.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size is zero, if the policy selects no
    /// samples or an out-of-range index, or if `drop_last` would leave no
    /// complete batch.
    pub fn build(self) -> Result<ImageDataLoader> {
        if self.batch_size == 0 {
            return Err(DataError::InvalidBatchSize(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        let n = self.dataset.len();
        self.policy.validate(n)?;
        let n_samples = self.policy.len(n);

        if n_samples == 0 {
            return Err(DataError::EmptyDataset);
        }

        if self.drop_last && n_samples < self.batch_size {
            return Err(DataError::InvalidBatchSize(format!(
                "drop_last with batch size {} leaves no batch out of {} samples",
                self.batch_size, n_samples
            )));
        }

        Ok(ImageDataLoader {
            dataset: self.dataset,
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            policy: self.policy,
            passes: AtomicUsize::new(0),
        })
    }
}

/// Iterator over the batches of one pass of an [`ImageDataLoader`].
pub struct ImageDataLoaderIter<'a, B: Backend> {
    loader: &'a ImageDataLoader,
    device: B::Device,
    indices: Vec<usize>,
    current_batch: usize,
    n_batches: usize,
}

impl<'a, B: Backend> ImageDataLoaderIter<'a, B> {
    fn new(loader: &'a ImageDataLoader, pass: usize, device: B::Device) -> Self {
        let indices = loader.policy.indices(loader.dataset.len(), pass);

        Self {
            loader,
            device,
            indices,
            current_batch: 0,
            n_batches: loader.n_batches(),
        }
    }
}

impl<B: Backend> Iterator for ImageDataLoaderIter<'_, B> {
    type Item = Result<ImageBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_batch >= self.n_batches {
            return None;
        }

        let start = self.current_batch * self.loader.batch_size;
        let end = std::cmp::min(start + self.loader.batch_size, self.indices.len());
        self.current_batch += 1;

        Some(collate(&self.loader.dataset, &self.indices[start..end], &self.device))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.n_batches - self.current_batch;
        (remaining, Some(remaining))
    }
}

impl<B: Backend> ExactSizeIterator for ImageDataLoaderIter<'_, B> {}

/// Stack the records at `indices` into one batch on `device`.
///
/// Labels are attached when the dataset is labeled.
///
/// # Errors
///
/// Returns an error if `indices` is empty or holds an out-of-range index.
pub fn collate<B: Backend>(
    dataset: &ImageDataset,
    indices: &[usize],
    device: &B::Device,
) -> Result<ImageBatch<B>> {
    if indices.is_empty() {
        return Err(DataError::InvalidBatchSize("cannot collate an empty batch".to_string()));
    }

    let shape = dataset.image_shape();
    let dims = shape.batch_dims(indices.len());

    let mut x_flat: Vec<f32> = Vec::with_capacity(indices.len() * shape.numel());
    let mut y_flat: Vec<i64> = Vec::with_capacity(indices.len());

    for &idx in indices {
        let record = dataset.get(idx)?;
        x_flat.extend(record.x.iter().copied());
        if let Some(y) = record.y {
            y_flat.push(y as i64);
        }
    }

    let x = Tensor::<B, 4>::from_data(TensorData::new(x_flat, dims), device);

    let batch = if dataset.has_targets() {
        let y = Tensor::<B, 1, Int>::from_data(TensorData::new(y_flat, [indices.len()]), device);
        ImageBatch::with_target(x, y, indices.to_vec())?
    } else {
        ImageBatch::new(x, indices.to_vec())?
    };

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlab_core::backend::NdArray;
    use ndarray::Array4;

    type B = NdArray;

    fn create_test_dataset(n: usize) -> ImageDataset {
        let x = Array4::from_shape_fn((n, 1, 2, 2), |(i, _, _, _)| i as f32);
        let y = (0..n).map(|i| i % 2).collect();
        ImageDataset::from_arrays(x, Some(y)).unwrap()
    }

    #[test]
    fn test_loader_builder() {
        let loader = ImageDataLoader::builder(create_test_dataset(100))
            .batch_size(32)
            .shuffle(Some(Seed::new(1)))
            .build()
            .unwrap();

        assert_eq!(loader.batch_size(), 32);
        assert_eq!(loader.n_batches(), 4);
        assert_eq!(loader.n_samples(), 100);
    }

    #[test]
    fn test_loader_drop_last() {
        let loader = ImageDataLoader::builder(create_test_dataset(100))
            .batch_size(32)
            .drop_last(true)
            .build()
            .unwrap();

        assert_eq!(loader.n_batches(), 3);
        assert_eq!(loader.n_samples(), 96);

        let device = Default::default();
        let sizes: Vec<usize> = loader
            .iter::<B>(&device)
            .map(|b| b.unwrap().batch_size())
            .collect();
        assert_eq!(sizes, vec![32, 32, 32]);
    }

    #[test]
    fn test_loader_invalid_config() {
        assert!(ImageDataLoader::builder(create_test_dataset(10))
            .batch_size(0)
            .build()
            .is_err());
        assert!(ImageDataLoader::builder(create_test_dataset(10))
            .policy(SamplerPolicy::subset(vec![]))
            .build()
            .is_err());
        assert!(ImageDataLoader::builder(create_test_dataset(10))
            .policy(SamplerPolicy::subset(vec![10]))
            .build()
            .is_err());
    }

    #[test]
    fn test_subset_sampling_counts() {
        let loader = ImageDataLoader::builder(create_test_dataset(50))
            .batch_size(4)
            .policy(SamplerPolicy::subset(vec![1, 3, 5, 7, 9, 11]))
            .build()
            .unwrap();

        assert_eq!(loader.n_samples(), 6);

        let device = Default::default();
        let batches: Vec<ImageBatch<B>> = loader.iter::<B>(&device).map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].indices, vec![1, 3, 5, 7]);
        assert_eq!(batches[1].indices, vec![9, 11]);
    }

    #[test]
    fn test_loader_restarts_with_new_order() {
        let loader = ImageDataLoader::builder(create_test_dataset(64))
            .batch_size(64)
            .shuffle(Some(Seed::new(7)))
            .build()
            .unwrap();

        let device = Default::default();
        let first: Vec<usize> = loader.iter::<B>(&device).flat_map(|b| b.unwrap().indices).collect();
        let second: Vec<usize> = loader.iter::<B>(&device).flat_map(|b| b.unwrap().indices).collect();

        assert_eq!(first.len(), 64);
        assert_eq!(second.len(), 64);
        assert_ne!(first, second);
    }

    #[test]
    fn test_collate_values() {
        let ds = create_test_dataset(5);
        let device = Default::default();
        let batch = collate::<B>(&ds, &[3, 0], &device).unwrap();

        assert_eq!(batch.x.dims(), [2, 1, 2, 2]);
        let x: Vec<f32> = batch.x.into_data().to_vec().unwrap();
        assert_eq!(&x[..4], &[3.0; 4]);
        assert_eq!(&x[4..], &[0.0; 4]);

        let y: Vec<i64> = batch
            .y
            .unwrap()
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap();
        assert_eq!(y, vec![1, 0]);
    }
}
