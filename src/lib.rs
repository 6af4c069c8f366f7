//! # genmetrics
//!
//! FID and PRDC evaluation of generated image sets against a reference set.
//!
//! ## Overview
//!
//! Images are pushed through a pluggable [`EmbeddingExtractor`] in batches. The
//! resulting embedding matrices feed two engines:
//!
//! - [`FidEngine`]: Fréchet distance between the Gaussian summaries of the
//!   reference set and each generated layer.
//! - [`PrdcEngine`]: precision, recall, density and coverage over k-nearest
//!   neighbour manifolds, per class, averaged per layer.
//!
//! [`Evaluator`] ties the two together and produces an [`EvaluationReport`]
//! where failed groups are marked unavailable instead of aborting the run.
//!
//! ## Structure
//!
//! - [`core`]: error type, embedding extractor trait, shared aliases
//! - [`data`]: datasets, class subsets, batching, image transforms
//! - [`accumulator`]: preallocated embedding buffer
//! - [`embed`]: batch embedding driver
//! - [`fid`] and [`prdc`]: the metric engines
//! - [`evaluation`] and [`report`]: run driver and persisted results
//! - [`utils`]: distance kernels

pub mod accumulator;
pub mod core;
pub mod data;
pub mod embed;
pub mod evaluation;
pub mod fid;
pub mod prdc;
pub mod report;
pub mod utils;

pub use accumulator::EmbeddingBuffer;
pub use crate::core::{
    ChannelMomentsExtractor, ClassLabel, EmbeddingExtractor, EmbeddingMatrix, ImageBatch,
    LayerIndex, MetricError, MetricResult, Role,
};
pub use data::{ClassSubset, Dataset, ImageSize, InMemoryDataset, Targets};
pub use embed::{BatchEmbedder, LabeledEmbeddings, NoProgress, Progress, TracingProgress};
pub use evaluation::{evaluate, Evaluator};
pub use fid::{frechet_distance, summarize, DistributionSummary, FidEngine, FrechetOptions};
pub use prdc::{compute_prdc, PrdcEngine, PrdcScores};
pub use report::{load_report, save_report, EvaluationReport, LayerReport, MetricOutcome};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Evaluation configuration.
///
/// Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Images per extractor call.
    pub batch_size: usize,
    /// Embedding dimensionality the extractor must produce.
    pub dims: usize,
    /// Worker threads for embedding; 1 embeds on the calling thread.
    pub num_workers: usize,
    /// Center crop applied to generated images before resizing.
    pub crop_size: Option<ImageSize>,
    /// Resize applied to generated images.
    pub resize: Option<ImageSize>,
    /// Neighbour count for PRDC.
    pub k: usize,
    pub frechet: FrechetOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 128,
            dims: 2048,
            num_workers: 8,
            crop_size: None,
            resize: Some(ImageSize::Square(299)),
            k: 3,
            frechet: FrechetOptions::default(),
        }
    }
}

impl Config {
    /// Reject values no evaluation can run with.
    ///
    /// # Errors
    /// - `InvalidConfig` naming the offending field
    pub fn validate(&self) -> MetricResult<()> {
        let invalid = |msg: &str| Err(MetricError::InvalidConfig(msg.to_string()));

        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if self.dims == 0 {
            return invalid("dims must be at least 1");
        }
        if self.k == 0 {
            return invalid("k must be at least 1");
        }
        for size in [self.crop_size, self.resize].into_iter().flatten() {
            let (h, w) = size.hw();
            if h == 0 || w == 0 {
                return invalid("crop and resize sizes must be non-zero");
            }
        }
        let FrechetOptions {
            eps,
            imaginary_tolerance,
            singular_tolerance,
        } = self.frechet;
        if eps.is_nan() || eps < 0.0 {
            return invalid("frechet.eps must be non-negative");
        }
        if [imaginary_tolerance, singular_tolerance]
            .iter()
            .any(|t| t.is_nan() || *t <= 0.0)
        {
            return invalid("frechet tolerances must be positive");
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> MetricResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> MetricResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}
