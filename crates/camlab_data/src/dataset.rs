//! Image dataset types.

use ndarray::{s, Array3, Array4, ArrayView3, Axis};

use camlab_core::ImageShape;

use crate::error::{DataError, Result};

/// One record of an [`ImageDataset`].
#[derive(Debug, Clone)]
pub struct Record<'a> {
    /// Image of shape `(C, H, W)`.
    pub x: ArrayView3<'a, f32>,
    /// Class index, if the dataset is labeled.
    pub y: Option<usize>,
}

/// A dataset of images with optional integer class labels.
///
/// Stores images in the `(N, C, H, W)` format:
/// - `N`: Number of samples
/// - `C`: Channels
/// - `H`, `W`: Spatial height and width
///
/// Every record shares the same `(C, H, W)` shape.
///
/// # Example
///
/// ```rust
/// use camlab_data::ImageDataset;
/// use ndarray::Array4;
///
/// let x = Array4::<f32>::zeros((10, 1, 28, 28));
/// let dataset = ImageDataset::from_arrays(x, Some(vec![0; 10])).unwrap();
/// assert_eq!(dataset.len(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct ImageDataset {
    x: Array4<f32>,
    y: Option<Vec<usize>>,
}

impl ImageDataset {
    /// Create a new dataset from a stacked image array and optional labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the label count does not match the image count.
    pub fn from_arrays(x: Array4<f32>, y: Option<Vec<usize>>) -> Result<Self> {
        let n_samples = x.shape()[0];

        if let Some(ref labels) = y {
            if labels.len() != n_samples {
                return Err(DataError::InvalidShape(format!(
                    "x has {} samples but y has {} labels",
                    n_samples,
                    labels.len()
                )));
            }
        }

        Ok(Self { x, y })
    }

    /// Create a dataset from individual images.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty, if any image differs in shape
    /// from the first one, or if the label count does not match.
    pub fn from_records(images: Vec<Array3<f32>>, y: Option<Vec<usize>>) -> Result<Self> {
        let first = images.first().ok_or(DataError::EmptyDataset)?;
        let shape = first.dim();

        for (i, image) in images.iter().enumerate() {
            if image.dim() != shape {
                return Err(DataError::InvalidShape(format!(
                    "record {} has shape {:?}, expected {:?}",
                    i,
                    image.dim(),
                    shape
                )));
            }
        }

        let views: Vec<ArrayView3<'_, f32>> = images.iter().map(|im| im.view()).collect();
        let x = ndarray::stack(Axis(0), &views)
            .map_err(|e| DataError::InvalidShape(e.to_string()))?;

        Self::from_arrays(x, y)
    }

    /// Get the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.shape()[0]
    }

    /// Check if the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape shared by every record.
    #[must_use]
    pub fn image_shape(&self) -> ImageShape {
        let s = self.x.shape();
        ImageShape::new(s[1], s[2], s[3])
    }

    /// Get a reference to the stacked images.
    #[must_use]
    pub fn x(&self) -> &Array4<f32> {
        &self.x
    }

    /// Labels in dataset order, if present.
    #[must_use]
    pub fn labels(&self) -> Option<&[usize]> {
        self.y.as_deref()
    }

    /// Check if the dataset has labels.
    #[must_use]
    pub fn has_targets(&self) -> bool {
        self.y.is_some()
    }

    /// Number of classes implied by the labels (`max label + 1`), 0 if unlabeled.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.y
            .as_ref()
            .and_then(|y| y.iter().max())
            .map_or(0, |max| max + 1)
    }

    /// Get a record by index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds.
    pub fn get(&self, index: usize) -> Result<Record<'_>> {
        if index >= self.len() {
            return Err(DataError::IndexOutOfBounds {
                index,
                length: self.len(),
            });
        }

        Ok(Record {
            x: self.x.slice(s![index, .., .., ..]),
            y: self.y.as_ref().map(|y| y[index]),
        })
    }

    /// Get a subset of samples by indices. Indices may repeat.
    ///
    /// # Errors
    ///
    /// Returns an error if any index is out of bounds.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(DataError::IndexOutOfBounds {
                index,
                length: self.len(),
            });
        }

        let x = self.x.select(Axis(0), indices);
        let y = self
            .y
            .as_ref()
            .map(|y| indices.iter().map(|&i| y[i]).collect());

        Ok(Self { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(n: usize) -> ImageDataset {
        let x = Array4::from_shape_fn((n, 1, 4, 4), |(i, _, h, w)| (i * 16 + h * 4 + w) as f32);
        let y = (0..n).map(|i| i % 3).collect();
        ImageDataset::from_arrays(x, Some(y)).unwrap()
    }

    #[test]
    fn test_dataset_creation() {
        let ds = labeled(6);
        assert_eq!(ds.len(), 6);
        assert_eq!(ds.image_shape(), ImageShape::grayscale(4, 4));
        assert_eq!(ds.n_classes(), 3);
        assert!(ds.has_targets());
    }

    #[test]
    fn test_label_count_mismatch() {
        let x = Array4::<f32>::zeros((5, 1, 2, 2));
        assert!(ImageDataset::from_arrays(x, Some(vec![0; 4])).is_err());
    }

    #[test]
    fn test_from_records_rejects_mixed_shapes() {
        let images = vec![Array3::zeros((1, 2, 2)), Array3::zeros((1, 3, 2))];
        assert!(ImageDataset::from_records(images, None).is_err());

        let images = vec![Array3::zeros((1, 2, 2)), Array3::ones((1, 2, 2))];
        let ds = ImageDataset::from_records(images, None).unwrap();
        assert_eq!(ds.len(), 2);
        assert!(!ds.has_targets());
        assert_eq!(ds.n_classes(), 0);
    }

    #[test]
    fn test_get_record() {
        let ds = labeled(4);
        let record = ds.get(2).unwrap();
        assert_eq!(record.y, Some(2));
        assert_eq!(record.x[[0, 0, 1]], 33.0);
        assert!(ds.get(4).is_err());
    }

    #[test]
    fn test_subset_allows_duplicates() {
        let ds = labeled(5);
        let sub = ds.subset(&[4, 1, 4]).unwrap();
        assert_eq!(sub.len(), 3);
        assert_eq!(sub.labels().unwrap(), &[1, 1, 1]);
        assert_eq!(sub.get(0).unwrap().x, ds.get(4).unwrap().x);
        assert!(ds.subset(&[5]).is_err());
    }
}
