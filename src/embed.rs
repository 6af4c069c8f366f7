//! Drive datasets through an [`EmbeddingExtractor`] batch by batch.
//!
//! # Pipeline
//!
//! ```text
//! dataset ──batch──▶ [transform, fake side only] ──▶ extractor ──▶ EmbeddingBuffer
//! ```
//!
//! With `num_workers > 1` the batches of one pass are embedded on a dedicated
//! rayon pool. Each batch owns a precomputed row range of the destination
//! buffer, and the buffer is only handed out after every batch has joined.

use crate::accumulator::EmbeddingBuffer;
use crate::core::{
    ClassLabel, EmbeddingExtractor, EmbeddingMatrix, ImageBatch, MetricError, MetricResult, Role,
};
use crate::data::{
    batch_ranges, crop_and_resize, load_batch, ClassSubset, DataLoader, Dataset, ImageTransform,
};
use crate::Config;
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Observer notified after every embedded batch.
pub trait Progress {
    fn step(&mut self, subtitle: &str);
}

impl<F: FnMut(&str)> Progress for F {
    fn step(&mut self, subtitle: &str) {
        self(subtitle);
    }
}

/// Ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn step(&mut self, _subtitle: &str) {}
}

/// Emits every progress step as a `debug` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn step(&mut self, subtitle: &str) {
        debug!(target: "genmetrics::progress", "{subtitle}");
    }
}

/// Embeddings of a whole dataset together with the label of every row.
#[derive(Debug, Clone)]
pub struct LabeledEmbeddings {
    pub embeddings: EmbeddingMatrix,
    pub labels: Vec<usize>,
}

impl LabeledEmbeddings {
    /// Rows belonging to `class`, in dataset order; all rows for `None`.
    ///
    /// Equivalent to embedding the class-filtered dataset, without another pass
    /// through the extractor.
    pub fn select(&self, class: ClassLabel) -> EmbeddingMatrix {
        let Some(class) = class else {
            return self.embeddings.clone();
        };
        let indices: Vec<usize> = self
            .labels
            .iter()
            .enumerate()
            .filter_map(|(i, &l)| (l == class).then_some(i))
            .collect();
        if indices.is_empty() {
            return Array2::zeros((0, self.embeddings.ncols()));
        }
        self.embeddings.select(Axis(0), &indices)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Batches datasets through the extractor and accumulates the embeddings.
pub struct BatchEmbedder {
    extractor: Arc<dyn EmbeddingExtractor>,
    /// Applied to fake-side batches only
    transform: Option<Box<dyn ImageTransform>>,
    batch_size: usize,
    dims: usize,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for BatchEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEmbedder")
            .field("extractor", &self.extractor.name())
            .field("transform", &self.transform.as_ref().map(|t| t.name()))
            .field("batch_size", &self.batch_size)
            .field("dims", &self.dims)
            .field(
                "workers",
                &self.pool.as_ref().map_or(1, rayon::ThreadPool::current_num_threads),
            )
            .finish()
    }
}

impl BatchEmbedder {
    /// Create an embedder from a validated configuration.
    ///
    /// The fake-side transform is `crop_size` center crop followed by `resize`,
    /// whichever of the two are set.
    ///
    /// # Errors
    /// - `InvalidConfig` if the configuration is invalid or the worker pool cannot start
    /// - `ShapeMismatch` if the extractor's dimensionality differs from `config.dims`
    pub fn new(extractor: Arc<dyn EmbeddingExtractor>, config: &Config) -> MetricResult<Self> {
        config.validate()?;
        if extractor.dims() != config.dims {
            return Err(MetricError::ShapeMismatch(format!(
                "extractor {} produces {} dims, config expects {}",
                extractor.name(),
                extractor.dims(),
                config.dims
            )));
        }

        let transform = crop_and_resize(config.crop_size, config.resize)
            .map(|t| Box::new(t) as Box<dyn ImageTransform>);

        let pool = if config.num_workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_workers)
                .thread_name(|i| format!("embed-{i}"))
                .build()
                .map_err(|e| MetricError::InvalidConfig(format!("worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            extractor,
            transform,
            batch_size: config.batch_size,
            dims: config.dims,
            pool,
        })
    }

    /// Replace the fake-side transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Option<Box<dyn ImageTransform>>) -> Self {
        self.transform = transform;
        self
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed one batch, applying the transform on the fake side.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the extractor output is not `(batch rows, dims)`
    pub fn embed_batch(&self, images: &ImageBatch, role: Role) -> MetricResult<EmbeddingMatrix> {
        let transformed;
        let input = match (role, &self.transform) {
            (Role::Fake, Some(transform)) => {
                transformed = transform.apply(images)?;
                &transformed
            }
            _ => images,
        };

        let embeddings = self.extractor.embed(input)?;
        let expected = (images.len_of(Axis(0)), self.dims);
        if embeddings.dim() != expected {
            return Err(MetricError::ShapeMismatch(format!(
                "extractor returned {:?}, expected {:?}",
                embeddings.dim(),
                expected
            )));
        }

        Ok(embeddings)
    }

    /// Lazily embed a dataset in order, yielding `(embeddings, consumed_count)`.
    pub fn batches<'s, D: Dataset + ?Sized>(
        &'s self,
        dataset: &'s D,
        role: Role,
    ) -> EmbeddedBatches<'s, D> {
        EmbeddedBatches {
            embedder: self,
            loader: DataLoader::new(dataset, self.batch_size),
            role,
        }
    }

    /// Embed every sample of `dataset` into one `len × dims` matrix.
    ///
    /// # Errors
    /// - `ShapeMismatch` from the extractor or the destination buffer
    pub fn embed_dataset<D: Dataset + ?Sized>(
        &self,
        dataset: &D,
        role: Role,
        progress: &mut dyn Progress,
    ) -> MetricResult<EmbeddingMatrix> {
        let total = dataset.len();
        let mut buffer = EmbeddingBuffer::allocate(total, self.dims);
        let num_batches = total.div_ceil(self.batch_size);

        match &self.pool {
            None => {
                let mut offset = 0;
                for (step, item) in self.batches(dataset, role).enumerate() {
                    let (embeddings, _) = item?;
                    offset = buffer.write(offset, embeddings.view())?;
                    progress.step(&format!(
                        "{} embedding step {step} of {num_batches}",
                        role.name()
                    ));
                }
            }
            Some(pool) => {
                let ranges = batch_ranges(total, self.batch_size);
                let embedded: Vec<MetricResult<EmbeddingMatrix>> = pool.install(|| {
                    ranges
                        .par_iter()
                        .map(|range| {
                            let (images, _) = load_batch(dataset, range.clone());
                            self.embed_batch(&images, role)
                        })
                        .collect()
                });

                for (step, (range, embeddings)) in ranges.iter().zip(embedded).enumerate() {
                    buffer.write(range.start, embeddings?.view())?;
                    progress.step(&format!(
                        "{} embedding step {step} of {num_batches}",
                        role.name()
                    ));
                }
            }
        }

        debug!(
            role = role.name(),
            samples = total,
            batches = num_batches,
            "embedded dataset"
        );
        buffer.finish()
    }

    /// Embed only the samples labelled `class` (everything for `None`).
    pub fn embed_class_subset<D: Dataset + ?Sized>(
        &self,
        dataset: &D,
        class: ClassLabel,
        role: Role,
        progress: &mut dyn Progress,
    ) -> MetricResult<EmbeddingMatrix> {
        match class {
            Some(class) => {
                let subset = ClassSubset::new(dataset, class);
                self.embed_dataset(&subset, role, progress)
            }
            None => self.embed_dataset(dataset, role, progress),
        }
    }

    /// Embed a dataset once and keep each row's label for later class selection.
    pub fn embed_labeled<D: Dataset + ?Sized>(
        &self,
        dataset: &D,
        role: Role,
        progress: &mut dyn Progress,
    ) -> MetricResult<LabeledEmbeddings> {
        let embeddings = self.embed_dataset(dataset, role, progress)?;
        let labels = (0..dataset.len()).map(|i| dataset.label(i)).collect();
        Ok(LabeledEmbeddings { embeddings, labels })
    }
}

/// Sequential embedding iterator returned by [`BatchEmbedder::batches`].
pub struct EmbeddedBatches<'s, D: Dataset + ?Sized> {
    embedder: &'s BatchEmbedder,
    loader: DataLoader<'s, D>,
    role: Role,
}

impl<D: Dataset + ?Sized> Iterator for EmbeddedBatches<'_, D> {
    type Item = MetricResult<(EmbeddingMatrix, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (images, _) = self.loader.next()?;
        let consumed = images.len_of(Axis(0));
        Some(
            self.embedder
                .embed_batch(&images, self.role)
                .map(|embeddings| (embeddings, consumed)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.loader.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChannelMomentsExtractor;
    use crate::data::InMemoryDataset;
    use ndarray::Array4;

    fn small_config(num_workers: usize) -> Config {
        Config {
            batch_size: 3,
            dims: 2,
            num_workers,
            crop_size: None,
            resize: None,
            ..Config::default()
        }
    }

    fn graded_dataset(n: usize) -> InMemoryDataset {
        let mut images = Array4::zeros((n, 2, 2, 1));
        for i in 0..n {
            images.index_axis_mut(Axis(0), i).fill(i as f32);
        }
        let labels = (0..n).map(|i| i % 2).collect();
        InMemoryDataset::new(images, labels).unwrap()
    }

    /// Returns a fixed-width matrix regardless of input.
    struct WrongWidth;

    impl EmbeddingExtractor for WrongWidth {
        fn embed(&self, images: &ImageBatch) -> MetricResult<EmbeddingMatrix> {
            Ok(Array2::zeros((images.len_of(Axis(0)), 5)))
        }

        fn dims(&self) -> usize {
            2
        }

        fn name(&self) -> &'static str {
            "wrong-width"
        }
    }

    #[test]
    fn test_dims_checked_at_construction() {
        let extractor = Arc::new(ChannelMomentsExtractor::new(3));
        let result = BatchEmbedder::new(extractor, &small_config(1));
        assert!(matches!(result, Err(MetricError::ShapeMismatch(_))));
    }

    #[test]
    fn test_embed_dataset_preserves_order() {
        let embedder =
            BatchEmbedder::new(Arc::new(ChannelMomentsExtractor::new(1)), &small_config(1))
                .unwrap();
        let dataset = graded_dataset(7);

        let mut steps = 0;
        let emb = embedder
            .embed_dataset(&dataset, Role::Real, &mut |_: &str| steps += 1)
            .unwrap();

        assert_eq!(emb.dim(), (7, 2));
        assert_eq!(steps, 3);
        for i in 0..7 {
            assert_eq!(emb[[i, 0]], i as f64);
            assert_eq!(emb[[i, 1]], 0.0);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let dataset = graded_dataset(11);
        let sequential =
            BatchEmbedder::new(Arc::new(ChannelMomentsExtractor::new(1)), &small_config(1))
                .unwrap();
        let parallel =
            BatchEmbedder::new(Arc::new(ChannelMomentsExtractor::new(1)), &small_config(4))
                .unwrap();

        let a = sequential
            .embed_dataset(&dataset, Role::Fake, &mut NoProgress)
            .unwrap();
        let b = parallel
            .embed_dataset(&dataset, Role::Fake, &mut NoProgress)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batches_report_consumed_count() {
        let embedder =
            BatchEmbedder::new(Arc::new(ChannelMomentsExtractor::new(1)), &small_config(1))
                .unwrap();
        let dataset = graded_dataset(7);

        let counts: Vec<usize> = embedder
            .batches(&dataset, Role::Real)
            .map(|item| item.unwrap().1)
            .collect();
        assert_eq!(counts, vec![3, 3, 1]);
    }

    #[test]
    fn test_extractor_width_mismatch_is_fatal() {
        let embedder = BatchEmbedder::new(Arc::new(WrongWidth), &small_config(1)).unwrap();
        let dataset = graded_dataset(4);
        let result = embedder.embed_dataset(&dataset, Role::Real, &mut NoProgress);
        assert!(matches!(result, Err(MetricError::ShapeMismatch(_))));
    }

    #[test]
    fn test_transform_only_on_fake_side() {
        // Crop a 4x4 image with a bright border down to its dark 2x2 center.
        let mut images = Array4::from_elem((1, 4, 4, 1), 1.0f32);
        for y in 1..3 {
            for x in 1..3 {
                images[[0, y, x, 0]] = 0.0;
            }
        }
        let dataset = InMemoryDataset::new(images, vec![0]).unwrap();

        let config = Config {
            crop_size: Some(crate::data::ImageSize::Square(2)),
            ..small_config(1)
        };
        let embedder =
            BatchEmbedder::new(Arc::new(ChannelMomentsExtractor::new(1)), &config).unwrap();

        let real = embedder
            .embed_dataset(&dataset, Role::Real, &mut NoProgress)
            .unwrap();
        let fake = embedder
            .embed_dataset(&dataset, Role::Fake, &mut NoProgress)
            .unwrap();

        assert!((real[[0, 0]] - 0.75).abs() < 1e-9);
        assert_eq!(fake[[0, 0]], 0.0);
    }

    #[test]
    fn test_class_subset_matches_selection() {
        let embedder =
            BatchEmbedder::new(Arc::new(ChannelMomentsExtractor::new(1)), &small_config(1))
                .unwrap();
        let dataset = graded_dataset(9);

        let labeled = embedder
            .embed_labeled(&dataset, Role::Real, &mut NoProgress)
            .unwrap();
        let direct = embedder
            .embed_class_subset(&dataset, Some(1), Role::Real, &mut NoProgress)
            .unwrap();

        assert_eq!(labeled.select(Some(1)), direct);
        assert_eq!(direct.nrows(), 4);
        assert_eq!(labeled.select(None).nrows(), 9);
        assert_eq!(labeled.select(Some(7)).dim(), (0, 2));
    }
}
