//! Image shape metadata.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Shape of a single image record, `(C, H, W)`.
///
/// Every record of a dataset shares one `ImageShape`; models declare the
/// shape they accept so that mismatches are caught before training starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    channels: usize,
    height: usize,
    width: usize,
}

impl ImageShape {
    /// Create a new shape.
    #[must_use]
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Single-channel shape, the MNIST case.
    #[must_use]
    pub const fn grayscale(height: usize, width: usize) -> Self {
        Self::new(1, height, width)
    }

    /// Create from a dimension slice `[C, H, W]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice does not have exactly 3 elements.
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match dims {
            [c, h, w] => Ok(Self::new(*c, *h, *w)),
            _ => Err(CoreError::InvalidShape {
                expected: "[C, H, W]".to_string(),
                got: format!("{:?}", dims),
            }),
        }
    }

    /// Number of channels.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Image height.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Image width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of values in one record.
    #[must_use]
    pub const fn numel(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// `[C, H, W]`.
    #[must_use]
    pub const fn as_array(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// `[batch, C, H, W]` for a batch of this shape.
    #[must_use]
    pub const fn batch_dims(&self, batch: usize) -> [usize; 4] {
        [batch, self.channels, self.height, self.width]
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(C={}, H={}, W={})", self.channels, self.height, self.width)
    }
}

impl From<[usize; 3]> for ImageShape {
    fn from([channels, height, width]: [usize; 3]) -> Self {
        Self::new(channels, height, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_creation() {
        let shape = ImageShape::grayscale(28, 28);
        assert_eq!(shape.channels(), 1);
        assert_eq!(shape.numel(), 784);
        assert_eq!(shape.batch_dims(5), [5, 1, 28, 28]);
    }

    #[test]
    fn test_shape_from_dims() {
        let shape = ImageShape::from_dims(&[3, 32, 32]).unwrap();
        assert_eq!(shape.as_array(), [3, 32, 32]);

        assert!(ImageShape::from_dims(&[28, 28]).is_err());
        assert!(ImageShape::from_dims(&[1, 1, 28, 28]).is_err());
    }

    #[test]
    fn test_shape_display() {
        assert_eq!(ImageShape::grayscale(28, 28).to_string(), "(C=1, H=28, W=28)");
    }

    #[test]
    fn test_shape_serialization() {
        let shape = ImageShape::new(1, 28, 28);
        let json = serde_json::to_string(&shape).unwrap();
        let restored: ImageShape = serde_json::from_str(&json).unwrap();
        assert_eq!(shape, restored);
    }
}
