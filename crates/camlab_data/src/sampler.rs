//! Sampling policies for dataloaders.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use camlab_core::Seed;

use crate::error::{DataError, Result};

/// Which dataset indices a loader visits on each pass, and in what order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SamplerPolicy {
    /// Every index in dataset order.
    #[default]
    Sequential,
    /// Every index, reshuffled on each pass.
    Shuffle {
        /// Seed for the first pass; later passes derive from it.
        seed: Seed,
    },
    /// An explicit index list, such as one fold of a k-fold split.
    Subset {
        /// Dataset indices to visit.
        indices: Vec<usize>,
        /// Reshuffle the subset on each pass when set.
        shuffle: Option<Seed>,
    },
}

impl SamplerPolicy {
    /// Shuffle every index with the given seed.
    #[must_use]
    pub fn shuffle(seed: Seed) -> Self {
        SamplerPolicy::Shuffle { seed }
    }

    /// Visit `indices` in the given order.
    #[must_use]
    pub fn subset(indices: Vec<usize>) -> Self {
        SamplerPolicy::Subset {
            indices,
            shuffle: None,
        }
    }

    /// Visit `indices` in a fresh random order each pass.
    #[must_use]
    pub fn shuffled_subset(indices: Vec<usize>, seed: Seed) -> Self {
        SamplerPolicy::Subset {
            indices,
            shuffle: Some(seed),
        }
    }

    /// Number of indices visited per pass over a dataset of length `n`.
    #[must_use]
    pub fn len(&self, n: usize) -> usize {
        match self {
            SamplerPolicy::Sequential | SamplerPolicy::Shuffle { .. } => n,
            SamplerPolicy::Subset { indices, .. } => indices.len(),
        }
    }

    /// Whether a pass visits no index at all.
    #[must_use]
    pub fn is_empty(&self, n: usize) -> bool {
        self.len(n) == 0
    }

    /// Check the policy against a dataset of length `n`.
    ///
    /// # Errors
    ///
    /// Returns an error if a subset index is out of bounds.
    pub fn validate(&self, n: usize) -> Result<()> {
        if let SamplerPolicy::Subset { indices, .. } = self {
            if let Some(&index) = indices.iter().find(|&&i| i >= n) {
                return Err(DataError::IndexOutOfBounds { index, length: n });
            }
        }
        Ok(())
    }

    /// Indices for pass number `pass` over a dataset of length `n`.
    ///
    /// Shuffled policies use `seed.derive("pass-{pass}")`, so every pass
    /// has its own order and the whole sequence is reproducible.
    #[must_use]
    pub fn indices(&self, n: usize, pass: usize) -> Vec<usize> {
        match self {
            SamplerPolicy::Sequential => (0..n).collect(),
            SamplerPolicy::Shuffle { seed } => {
                let mut indices: Vec<usize> = (0..n).collect();
                indices.shuffle(&mut pass_rng(*seed, pass));
                indices
            }
            SamplerPolicy::Subset { indices, shuffle } => {
                let mut indices = indices.clone();
                if let Some(seed) = shuffle {
                    indices.shuffle(&mut pass_rng(*seed, pass));
                }
                indices
            }
        }
    }
}

fn pass_rng(seed: Seed, pass: usize) -> rand_chacha::ChaCha8Rng {
    seed.derive(&format!("pass-{}", pass)).to_rng()
}
