//! Dataset splitting utilities.

use rand::prelude::*;

use camlab_core::Seed;

use crate::dataset::ImageDataset;
use crate::error::{DataError, Result};

fn check_ratio(name: &str, ratio: f32) -> Result<()> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(DataError::SplitError(format!(
            "{} must be between 0 and 1, got {}",
            name, ratio
        )));
    }
    Ok(())
}

fn permutation(n: usize, seed: Seed) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut seed.to_rng());
    indices
}

/// Split a dataset into train and test sets.
///
/// The test set gets `ceil(n * test_ratio)` samples, clamped so that both
/// sides keep at least one sample.
///
/// # Arguments
///
/// * `dataset` - The dataset to split
/// * `test_ratio` - Ratio for the test set (e.g., 0.2 for 20%)
/// * `seed` - Random seed for reproducibility
///
/// # Returns
///
/// A tuple of (train_dataset, test_dataset).
pub fn train_test_split(
    dataset: &ImageDataset,
    test_ratio: f32,
    seed: Seed,
) -> Result<(ImageDataset, ImageDataset)> {
    check_ratio("test_ratio", test_ratio)?;

    let n = dataset.len();
    if n < 2 {
        return Err(DataError::SplitError(format!(
            "need at least 2 samples to split, got {}",
            n
        )));
    }

    let n_test = (n as f32 * test_ratio).ceil() as usize;
    let n_test = n_test.clamp(1, n - 1);

    let indices = permutation(n, seed);
    let train = dataset.subset(&indices[n_test..])?;
    let test = dataset.subset(&indices[..n_test])?;

    Ok((train, test))
}

/// Randomly split a dataset by ratio, returning index lists.
///
/// The second split gets `floor(n * test_size)` samples and the first one
/// the rest, so a tiny dataset may yield an empty second split.
///
/// # Returns
///
/// A tuple of (first_indices, second_indices).
pub fn random_split_ratio(
    dataset: &ImageDataset,
    test_size: f32,
    seed: Seed,
) -> Result<(Vec<usize>, Vec<usize>)> {
    check_ratio("test_size", test_size)?;

    let n = dataset.len();
    let n_second = (n as f32 * test_size).floor() as usize;
    let n_first = n - n_second;

    let indices = permutation(n, seed);
    Ok((indices[..n_first].to_vec(), indices[n_first..].to_vec()))
}

/// One fold of a k-fold split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    /// Indices used for training in this fold.
    pub train: Vec<usize>,
    /// Held-out indices for this fold.
    pub valid: Vec<usize>,
}

/// Generate k-fold train/validation index splits.
///
/// Indices are optionally shuffled once, then cut into `k` contiguous
/// folds; the first `n % k` folds get one extra sample. Each fold's
/// `valid` list feeds a [`SamplerPolicy::Subset`](crate::SamplerPolicy::Subset).
///
/// # Errors
///
/// Returns an error if `k < 2` or `k > n`.
pub fn k_fold_indices(n: usize, k: usize, shuffle: Option<Seed>) -> Result<Vec<Fold>> {
    if k < 2 || k > n {
        return Err(DataError::SplitError(format!(
            "k must be in [2, {}], got {}",
            n, k
        )));
    }

    let indices = match shuffle {
        Some(seed) => permutation(n, seed),
        None => (0..n).collect(),
    };

    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;

    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let end = start + size;
        let valid = indices[start..end].to_vec();
        let train = indices[..start]
            .iter()
            .chain(&indices[end..])
            .copied()
            .collect();
        folds.push(Fold { train, valid });
        start = end;
    }

    Ok(folds)
}
