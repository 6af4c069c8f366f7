//! In-memory image dataset.
//!
//! Images are stored as one `(n, height, width, channels)` array with pixel
//! values as `f32`. Byte images are normalized to \[0, 1\] on construction,
//! channels interleaved per pixel (HWC):
//! ```text
//! [R,G,B, R,G,B, ...]  row-major within each image
//! ```

use super::Dataset;
use crate::core::{ImageBatch, MetricError, MetricResult};
use ndarray::{Array4, ArrayView3, Axis};

/// A loaded image dataset with labels, kept entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    /// Pixel data, shape `(num_images, height, width, channels)`.
    pub images: ImageBatch,
    /// Class label of every image.
    pub labels: Vec<usize>,
}

impl InMemoryDataset {
    /// Wrap an image array and its labels.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the label count differs from the image count
    pub fn new(images: ImageBatch, labels: Vec<usize>) -> MetricResult<Self> {
        if images.len_of(Axis(0)) != labels.len() {
            return Err(MetricError::ShapeMismatch(format!(
                "{} images but {} labels",
                images.len_of(Axis(0)),
                labels.len()
            )));
        }
        Ok(Self { images, labels })
    }

    /// Build from 8-bit HWC pixels, normalizing to \[0, 1\].
    ///
    /// # Errors
    /// - `ShapeMismatch` if `pixels` is not `labels.len() * h * w * c` long
    pub fn from_u8_pixels(
        pixels: &[u8],
        labels: Vec<usize>,
        height: usize,
        width: usize,
        channels: usize,
    ) -> MetricResult<Self> {
        let n = labels.len();
        let expected = n * height * width * channels;
        if pixels.len() != expected {
            return Err(MetricError::ShapeMismatch(format!(
                "pixel buffer holds {} bytes, expected {expected}",
                pixels.len()
            )));
        }

        let data: Vec<f32> = pixels.iter().map(|&p| f32::from(p) / 255.0).collect();
        let images = Array4::from_shape_vec((n, height, width, channels), data)
            .map_err(|e| MetricError::ShapeMismatch(e.to_string()))?;

        Self::new(images, labels)
    }

    /// Largest label plus one (0 for an empty dataset).
    pub fn num_classes(&self) -> usize {
        self.labels.iter().max().map_or(0, |&m| m + 1)
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        let (_, h, w, c) = self.images.dim();
        (h, w, c)
    }

    fn image(&self, index: usize) -> ArrayView3<'_, f32> {
        self.images.index_axis(Axis(0), index)
    }

    fn label(&self, index: usize) -> usize {
        self.labels[index]
    }
}
