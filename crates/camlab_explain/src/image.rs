//! Pixel helpers: resizing, color mapping and overlays.

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};

use crate::error::{ExplainError, Result};

/// 8-bit RGB raster, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl RgbImage {
    /// Create an image filled with one color.
    pub fn new(width: usize, height: usize, fill: [u8; 3]) -> Self {
        let data = fill.iter().copied().cycle().take(width * height * 3).collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Gray image from values in `[0, 1]`.
    pub fn from_gray(values: ArrayView2<f32>) -> Self {
        let (height, width) = values.dim();
        let mut image = Self::new(width, height, [0, 0, 0]);
        for ((row, col), &v) in values.indexed_iter() {
            let level = to_u8(v);
            image.put_pixel(col, row, [level, level, level]);
        }
        image
    }

    /// Wrap raw row-major RGB bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::InvalidOption`] when the byte count is not
    /// `width * height * 3`.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height * 3 {
            return Err(ExplainError::InvalidOption(format!(
                "{} bytes do not hold a {}x{} RGB image",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Raw RGB bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Color at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    /// Set the color at `(x, y)`; out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: usize, y: usize, rgb: [u8; 3]) {
        if x < self.width && y < self.height {
            let i = (y * self.width + x) * 3;
            self.data[i..i + 3].copy_from_slice(&rgb);
        }
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Average the channels of a `(C, H, W)` record into a gray image.
pub fn to_grayscale(record: ArrayView3<f32>) -> Array2<f32> {
    record
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array2::zeros((record.dim().1, record.dim().2)))
}

/// Bilinear resize with half-pixel centers.
///
/// # Errors
///
/// Returns [`ExplainError::InvalidOption`] for an empty source or target.
pub fn resize_bilinear(map: ArrayView2<f32>, height: usize, width: usize) -> Result<Array2<f32>> {
    let (in_h, in_w) = map.dim();
    if in_h == 0 || in_w == 0 || height == 0 || width == 0 {
        return Err(ExplainError::InvalidOption(format!(
            "cannot resize {}x{} to {}x{}",
            in_h, in_w, height, width
        )));
    }
    if (in_h, in_w) == (height, width) {
        return Ok(map.to_owned());
    }

    let sample = |dst: usize, src_len: usize, dst_len: usize| {
        let scale = src_len as f32 / dst_len as f32;
        let pos = ((dst as f32 + 0.5) * scale - 0.5).clamp(0.0, (src_len - 1) as f32);
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(src_len - 1);
        (lo, hi, pos - lo as f32)
    };

    Ok(Array2::from_shape_fn((height, width), |(row, col)| {
        let (y0, y1, fy) = sample(row, in_h, height);
        let (x0, x1, fx) = sample(col, in_w, width);
        let top = map[[y0, x0]] * (1.0 - fx) + map[[y0, x1]] * fx;
        let bottom = map[[y1, x0]] * (1.0 - fx) + map[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    }))
}

/// Jet color map: blue at 0, through cyan, yellow, to red at 1.
pub fn jet(v: f32) -> [f32; 3] {
    let v = v.clamp(0.0, 1.0);
    let channel = |center: f32| (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Blend a jet-colored mask onto a gray image.
///
/// Both arrays are `[0, 1]` and share one shape; `image_weight` is the share
/// of the image in the blend. The result is rescaled by its maximum.
///
/// # Errors
///
/// Returns [`ExplainError::InvalidOption`] when the shapes differ or the
/// weight is outside `[0, 1]`.
pub fn overlay(image: ArrayView2<f32>, mask: ArrayView2<f32>, image_weight: f32) -> Result<RgbImage> {
    if image.dim() != mask.dim() {
        return Err(ExplainError::InvalidOption(format!(
            "image {:?} and mask {:?} differ in shape",
            image.dim(),
            mask.dim()
        )));
    }
    if !(0.0..=1.0).contains(&image_weight) {
        return Err(ExplainError::InvalidOption(format!(
            "image_weight must be in [0, 1], got {}",
            image_weight
        )));
    }

    let (height, width) = image.dim();
    let mut blended = Vec::with_capacity(height * width);
    let mut peak = 0.0f32;
    for (&gray, &m) in image.iter().zip(mask.iter()) {
        let gray = gray.clamp(0.0, 1.0);
        let rgb = jet(m).map(|c| (1.0 - image_weight) * c + image_weight * gray);
        peak = rgb.iter().copied().fold(peak, f32::max);
        blended.push(rgb);
    }

    let mut out = RgbImage::new(width, height, [0, 0, 0]);
    let norm = if peak > 0.0 { peak } else { 1.0 };
    for (i, rgb) in blended.into_iter().enumerate() {
        out.put_pixel(i % width, i / width, rgb.map(|c| to_u8(c / norm)));
    }
    Ok(out)
}

/// Flip each row of a map left to right.
pub fn flip_horizontal(map: &Array2<f32>) -> Array2<f32> {
    let mut flipped = map.clone();
    flipped.invert_axis(Axis(1));
    flipped.as_standard_layout().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_resize_identity_and_constant() {
        let map = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f32);
        assert_eq!(resize_bilinear(map.view(), 3, 4).unwrap(), map);

        let flat = Array2::from_elem((2, 2), 0.25f32);
        let up = resize_bilinear(flat.view(), 7, 5).unwrap();
        assert_eq!(up.dim(), (7, 5));
        assert!(up.iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_resize_preserves_range() {
        let map = Array2::from_shape_fn((3, 3), |(r, c)| if r == c { 1.0 } else { 0.0 });
        let up = resize_bilinear(map.view(), 28, 28).unwrap();
        assert!(up.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_relative_eq!(up[[0, 0]], 1.0);
        assert!(resize_bilinear(map.view(), 0, 4).is_err());
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), [0.0, 0.0, 0.5]);
        assert_eq!(jet(1.0), [0.5, 0.0, 0.0]);
        assert_eq!(jet(0.5), [0.5, 1.0, 0.5]);
    }

    #[test]
    fn test_overlay() {
        let image = Array2::from_elem((2, 3), 0.5f32);
        let mask = Array2::from_shape_fn((2, 3), |(_, c)| c as f32 / 2.0);
        let out = overlay(image.view(), mask.view(), 0.5).unwrap();
        assert_eq!((out.width(), out.height()), (3, 2));
        // Hot end is red-dominated, cold end blue-dominated.
        let hot = out.pixel(2, 0).unwrap();
        let cold = out.pixel(0, 0).unwrap();
        assert!(hot[0] > hot[2]);
        assert!(cold[2] > cold[0]);

        assert!(overlay(image.view(), mask.view(), 1.5).is_err());
        assert!(overlay(image.view(), Array2::zeros((3, 2)).view(), 0.5).is_err());
    }

    #[test]
    fn test_from_raw_checks_length() {
        let image = RgbImage::from_raw(2, 1, vec![0, 0, 0, 255, 10, 20]).unwrap();
        assert_eq!(image.pixel(1, 0), Some([255, 10, 20]));
        assert_eq!(image.pixel(2, 0), None);
        assert!(RgbImage::from_raw(2, 2, vec![0; 6]).is_err());
    }

    #[test]
    fn test_flip_horizontal() {
        let map = Array2::from_shape_vec((1, 3), vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(flip_horizontal(&map).as_slice().unwrap(), &[3.0, 2.0, 1.0]);
    }
}
