//! Core types shared by every stage of the evaluation pipeline.
//!
//! This module provides:
//! - The crate-wide error type and result alias
//! - The [`EmbeddingExtractor`] seam through which image batches become embeddings
//! - Image batch and role vocabulary used by the embedder and the metric engines
//!
//! ## Shapes
//!
//! ```text
//! ImageBatch       : (n, height, width, channels)   f32, HWC per image
//! EmbeddingMatrix  : (n, dims)                      f64, one row per sample
//! ```
//!
//! Row order of an embedding matrix always matches dataset iteration order.

use ndarray::{Array2, Array4, Axis};
use thiserror::Error;

/// A batch of images, shape `(n, height, width, channels)`.
pub type ImageBatch = Array4<f32>;

/// An N×D matrix of embeddings, one row per sample.
pub type EmbeddingMatrix = Array2<f64>;

/// Checkpoint of the iterative generation process, `0..layer_num`.
pub type LayerIndex = usize;

/// Optional class restriction; `None` means the full set.
pub type ClassLabel = Option<usize>;

/// Error type for metric computation.
#[derive(Debug, Error)]
pub enum MetricError {
    /// Extractor output or accumulator write disagrees with the expected shape.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A group holds too few samples for the requested statistic.
    #[error("Insufficient samples: need at least {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    /// The Fréchet distance kept a non-negligible imaginary part after regularization.
    #[error("Numerical instability: imaginary component {imaginary:.6e}")]
    NumericalInstability { imaginary: f64 },

    /// Aggregation requested for a layer with no recorded results.
    #[error("No recorded results for layer {layer}")]
    EmptyAggregate { layer: LayerIndex },

    /// Layer index outside the engine's range.
    #[error("Unknown layer {layer} (engine tracks {layer_num} layers)")]
    UnknownLayer {
        layer: LayerIndex,
        layer_num: usize,
    },

    /// Embeddings pushed into a layer whose FID was already computed.
    #[error("Layer {0} is finalized")]
    LayerFinalized(LayerIndex),

    /// Registry lookup for a name that has no constructor.
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Invalid configuration value.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MetricError {
    /// Whether the failure only invalidates one (layer, class) group.
    ///
    /// Group-local failures are reported as unavailable metrics and the run
    /// continues; everything else aborts the run.
    pub fn is_group_local(&self) -> bool {
        matches!(
            self,
            MetricError::InsufficientSamples { .. }
                | MetricError::NumericalInstability { .. }
                | MetricError::EmptyAggregate { .. }
        )
    }
}

pub type MetricResult<T> = Result<T, MetricError>;

/// Which side of the comparison a dataset belongs to.
///
/// The image transform is applied to [`Role::Fake`] batches only; reference
/// images are expected in the extractor's native format already.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Real,
    Fake,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Real => "real",
            Role::Fake => "fake",
        }
    }
}

/// Feature network mapping an image batch to an embedding batch.
///
/// Implementations must be pure with respect to the batch: no mutable
/// cross-batch state, so batches can be embedded from several threads.
pub trait EmbeddingExtractor: Send + Sync {
    /// Embed a batch: `(n, h, w, c)` → `(n, dims)`.
    fn embed(&self, images: &ImageBatch) -> MetricResult<EmbeddingMatrix>;

    /// Output dimensionality D.
    fn dims(&self) -> usize;

    /// Name for debugging
    fn name(&self) -> &'static str;
}

/// Per-channel mean and standard deviation of every image.
///
/// A cheap, deterministic stand-in for a pretrained network: output
/// dimensionality is `2 * channels`, laid out as `[means.., stds..]`.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMomentsExtractor {
    pub channels: usize,
}

impl ChannelMomentsExtractor {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl EmbeddingExtractor for ChannelMomentsExtractor {
    #[allow(clippy::cast_precision_loss)]
    fn embed(&self, images: &ImageBatch) -> MetricResult<EmbeddingMatrix> {
        let (n, h, w, c) = images.dim();
        if c != self.channels {
            return Err(MetricError::ShapeMismatch(format!(
                "expected {} channels, got {c}",
                self.channels
            )));
        }
        let pixels = (h * w) as f64;
        let mut out = Array2::zeros((n, 2 * c));
        if pixels == 0.0 {
            return Ok(out);
        }

        for (i, image) in images.axis_iter(Axis(0)).enumerate() {
            for ch in 0..c {
                let plane = image.index_axis(Axis(2), ch);
                let mean = plane.iter().map(|&v| f64::from(v)).sum::<f64>() / pixels;
                let var = plane
                    .iter()
                    .map(|&v| {
                        let d = f64::from(v) - mean;
                        d * d
                    })
                    .sum::<f64>()
                    / pixels;
                out[[i, ch]] = mean;
                out[[i, c + ch]] = var.sqrt();
            }
        }

        Ok(out)
    }

    fn dims(&self) -> usize {
        2 * self.channels
    }

    fn name(&self) -> &'static str {
        "channel-moments"
    }
}
