//! Datasets, batching, and class selection.
//!
//! ## Submodules
//!
//! - [`image`] — In-memory image dataset
//! - [`transform`] — Crop/resize transforms and the transform registry

pub mod image;
pub mod transform;

pub use image::InMemoryDataset;
pub use transform::{
    compose_from_specs, crop_and_resize, transform_from_spec, CenterCrop, Compose, ImageSize,
    ImageTransform, Resize, TransformSpec,
};

use crate::core::{ImageBatch, MetricError, MetricResult};
use ndarray::{ArrayView3, Axis};
use std::ops::Range;

/// A labelled image source with a known length and stable order.
///
/// Every image in a dataset shares the same `(height, width, channels)` shape.
pub trait Dataset: Send + Sync {
    /// Number of samples.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of a single image: `(height, width, channels)`.
    fn image_shape(&self) -> (usize, usize, usize);

    /// Image at `index`, HWC layout.
    fn image(&self, index: usize) -> ArrayView3<'_, f32>;

    /// Class label at `index`.
    fn label(&self, index: usize) -> usize;
}

/// View of a dataset restricted to one class, in the parent's order.
pub struct ClassSubset<'a, D: Dataset + ?Sized> {
    inner: &'a D,
    indices: Vec<usize>,
    class: usize,
}

impl<'a, D: Dataset + ?Sized> ClassSubset<'a, D> {
    pub fn new(inner: &'a D, class: usize) -> Self {
        let indices = (0..inner.len())
            .filter(|&i| inner.label(i) == class)
            .collect();
        Self {
            inner,
            indices,
            class,
        }
    }

    pub fn class(&self) -> usize {
        self.class
    }

    /// Positions of the selected samples in the parent dataset.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl<D: Dataset + ?Sized> Dataset for ClassSubset<'_, D> {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        self.inner.image_shape()
    }

    fn image(&self, index: usize) -> ArrayView3<'_, f32> {
        self.inner.image(self.indices[index])
    }

    fn label(&self, index: usize) -> usize {
        self.inner.label(self.indices[index])
    }
}

/// Contiguous index ranges covering `0..len` in order, the last one possibly short.
pub fn batch_ranges(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    if batch_size == 0 {
        return Vec::new();
    }
    (0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect()
}

/// Stack the images in `range` into one batch and collect their labels.
pub fn load_batch<D: Dataset + ?Sized>(dataset: &D, range: Range<usize>) -> (ImageBatch, Vec<usize>) {
    let (h, w, c) = dataset.image_shape();
    let mut images = ImageBatch::zeros((range.len(), h, w, c));
    let mut labels = Vec::with_capacity(range.len());

    for (slot, index) in range.enumerate() {
        images.index_axis_mut(Axis(0), slot).assign(&dataset.image(index));
        labels.push(dataset.label(index));
    }

    (images, labels)
}

/// Sequential, non-shuffling batch iterator over a dataset.
///
/// Yields every sample exactly once in dataset order; the final partial batch
/// is kept.
pub struct DataLoader<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    ranges: std::vec::IntoIter<Range<usize>>,
}

impl<'a, D: Dataset + ?Sized> DataLoader<'a, D> {
    pub fn new(dataset: &'a D, batch_size: usize) -> Self {
        Self {
            dataset,
            ranges: batch_ranges(dataset.len(), batch_size).into_iter(),
        }
    }
}

impl<D: Dataset + ?Sized> Iterator for DataLoader<'_, D> {
    type Item = (ImageBatch, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.ranges.next()?;
        Some(load_batch(self.dataset, range))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ranges.size_hint()
    }
}

/// Which target classes an evaluation covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Every class `0..num_classes`.
    All,
    Single(usize),
    /// Explicit list; duplicates are evaluated once.
    List(Vec<usize>),
}

impl Targets {
    /// Resolve to the ordered list of class labels to evaluate.
    ///
    /// # Errors
    /// - `InvalidConfig` if a class is outside `0..num_classes` or the list is empty
    pub fn resolve(&self, num_classes: usize) -> MetricResult<Vec<usize>> {
        let classes = match self {
            Targets::All => (0..num_classes).collect::<Vec<_>>(),
            Targets::Single(class) => vec![*class],
            Targets::List(list) => {
                let mut seen = Vec::with_capacity(list.len());
                for &class in list {
                    if !seen.contains(&class) {
                        seen.push(class);
                    }
                }
                seen
            }
        };

        if classes.is_empty() {
            return Err(MetricError::InvalidConfig(
                "no target classes to evaluate".to_string(),
            ));
        }
        if let Some(&bad) = classes.iter().find(|&&c| c >= num_classes) {
            return Err(MetricError::InvalidConfig(format!(
                "target class {bad} outside 0..{num_classes}"
            )));
        }

        Ok(classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn labelled_dataset() -> InMemoryDataset {
        let mut images = Array4::zeros((5, 2, 2, 1));
        for i in 0..5 {
            images.index_axis_mut(Axis(0), i).fill(i as f32);
        }
        InMemoryDataset::new(images, vec![0, 1, 0, 2, 0]).unwrap()
    }

    #[test]
    fn test_batch_ranges_keep_partial_batch() {
        assert_eq!(batch_ranges(7, 3), vec![0..3, 3..6, 6..7]);
        assert_eq!(batch_ranges(6, 3), vec![0..3, 3..6]);
        assert!(batch_ranges(0, 3).is_empty());
        assert!(batch_ranges(5, 0).is_empty());
    }

    #[test]
    fn test_data_loader_order() {
        let dataset = labelled_dataset();
        let batches: Vec<_> = DataLoader::new(&dataset, 2).collect();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].0.dim(), (2, 2, 2, 1));
        assert_eq!(batches[2].0.dim(), (1, 2, 2, 1));
        assert_eq!(batches[1].1, vec![0, 2]);
        assert_eq!(batches[2].0[[0, 0, 0, 0]], 4.0);
    }

    #[test]
    fn test_class_subset() {
        let dataset = labelled_dataset();
        let subset = ClassSubset::new(&dataset, 0);

        assert_eq!(subset.len(), 3);
        assert_eq!(subset.indices(), &[0, 2, 4]);
        assert_eq!(subset.image(1)[[0, 0, 0]], 2.0);
        assert_eq!(subset.label(2), 0);

        let empty = ClassSubset::new(&dataset, 9);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_targets_resolve() {
        assert_eq!(Targets::All.resolve(3).unwrap(), vec![0, 1, 2]);
        assert_eq!(Targets::Single(2).resolve(3).unwrap(), vec![2]);
        assert_eq!(
            Targets::List(vec![1, 0, 1]).resolve(3).unwrap(),
            vec![1, 0]
        );
        assert!(Targets::Single(5).resolve(3).is_err());
        assert!(Targets::List(vec![]).resolve(3).is_err());
    }
}
