//! Fréchet distance between Gaussian summaries of embedding sets.
//!
//! ## Distance
//!
//! ```text
//! d² = ||μa − μb||² + tr(Σa) + tr(Σb) − 2 · tr((Σa Σb)^½)
//! ```
//!
//! `Σa Σb` is not symmetric, but it is similar to `√Σa Σb √Σa`, which is. The
//! trace of the square root is therefore the sum of square roots of the
//! eigenvalues of that symmetric product, obtained from a symmetric
//! eigen-decomposition.
//!
//! Rounding error pushes the many near-zero eigenvalues of a rank-deficient
//! product slightly below zero. Those within `singular_tolerance · max(1, |λ|max)`
//! of zero are clipped. Anything more negative makes the product singular: it
//! is retried once with `ε·I` added to both covariances. Negative mass that
//! survives the retry forms the imaginary part of the trace, which is dropped
//! when below `imaginary_tolerance · √max(1, |λ|max)` and reported as
//! [`MetricError::NumericalInstability`] otherwise.

use crate::core::{EmbeddingMatrix, LayerIndex, MetricError, MetricResult};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Iteration cap for the symmetric eigen solver.
const MAX_EIGEN_ITERATIONS: usize = 10_000;

/// Numerical policy for [`frechet_distance`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrechetOptions {
    /// Diagonal offset added to both covariances on the regularization retry.
    pub eps: f64,
    /// Largest imaginary trace component that is silently discarded, relative
    /// to the square root of the spectrum's scale.
    pub imaginary_tolerance: f64,
    /// Noise floor for negative eigenvalues, relative to the spectrum's scale.
    /// Below it they are clipped; beyond it the product counts as singular.
    pub singular_tolerance: f64,
}

impl Default for FrechetOptions {
    fn default() -> Self {
        Self {
            eps: 1e-6,
            imaginary_tolerance: 1e-3,
            singular_tolerance: 1e-10,
        }
    }
}

/// Mean and unbiased covariance of an embedding set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
}

impl DistributionSummary {
    pub fn dims(&self) -> usize {
        self.mean.len()
    }
}

/// Sample mean and covariance, rows as observations and columns as variables.
///
/// # Errors
/// - `InsufficientSamples` if fewer than two rows are given
#[allow(clippy::cast_precision_loss)]
pub fn summarize(embeddings: ArrayView2<f64>) -> MetricResult<DistributionSummary> {
    let n = embeddings.nrows();
    if n < 2 {
        return Err(MetricError::InsufficientSamples {
            required: 2,
            actual: n,
        });
    }

    let mean = embeddings
        .mean_axis(Axis(0))
        .ok_or(MetricError::InsufficientSamples {
            required: 2,
            actual: 0,
        })?;
    let centered = &embeddings - &mean;
    let covariance = centered.t().dot(&centered) / (n - 1) as f64;

    Ok(DistributionSummary { mean, covariance })
}

/// Real and imaginary parts of `tr((Σa Σb)^½)`.
#[derive(Debug, Clone, Copy)]
struct SqrtTrace {
    real: f64,
    /// Sum of `√(−λ)` over negative eigenvalues beyond the noise floor.
    imaginary: f64,
    min_eigenvalue: f64,
    /// `max(1, |λ|max)`
    scale: f64,
}

impl SqrtTrace {
    const UNDEFINED: SqrtTrace = SqrtTrace {
        real: f64::NAN,
        imaginary: f64::NAN,
        min_eigenvalue: f64::NAN,
        scale: f64::NAN,
    };

    fn is_finite(&self) -> bool {
        self.real.is_finite() && self.imaginary.is_finite()
    }

    /// Non-finite, or with a negative eigenvalue above the noise floor.
    fn is_singular(&self) -> bool {
        !self.is_finite() || self.imaginary > 0.0
    }

    /// Imaginary part too large relative to the spectrum, measured in the
    /// same square-root units as the trace.
    fn is_unstable(&self, tolerance: f64) -> bool {
        !self.is_finite() || self.imaginary > tolerance * self.scale.sqrt()
    }
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn symmetrized(m: DMatrix<f64>) -> DMatrix<f64> {
    (&m + m.transpose()) * 0.5
}

/// Square root of a symmetric PSD matrix, negative eigenvalues clipped to zero.
fn psd_sqrt(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let eigen = SymmetricEigen::try_new(symmetrized(m.clone()), f64::EPSILON, MAX_EIGEN_ITERATIONS)?;
    let roots = DVector::from_iterator(
        eigen.eigenvalues.len(),
        eigen.eigenvalues.iter().map(|&v| v.max(0.0).sqrt()),
    );
    let v = &eigen.eigenvectors;
    Some(v * DMatrix::from_diagonal(&roots) * v.transpose())
}

/// Eigenvalues of `√Σa Σb √Σa` whose magnitude is within
/// `noise_tolerance · max(1, |λ|max)` of zero are rounding noise: negative
/// ones are clipped to zero instead of counting as imaginary mass.
fn trace_sqrt_product(a: &DMatrix<f64>, b: &DMatrix<f64>, noise_tolerance: f64) -> SqrtTrace {
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return SqrtTrace::UNDEFINED;
    }
    let Some(sqrt_a) = psd_sqrt(a) else {
        return SqrtTrace::UNDEFINED;
    };
    let product = symmetrized(&sqrt_a * b * &sqrt_a);
    let Some(eigen) = SymmetricEigen::try_new(product, f64::EPSILON, MAX_EIGEN_ITERATIONS) else {
        return SqrtTrace::UNDEFINED;
    };

    let scale = eigen
        .eigenvalues
        .iter()
        .fold(1.0_f64, |acc, &v| acc.max(v.abs()));
    let noise_floor = noise_tolerance * scale;

    let mut trace = SqrtTrace {
        real: 0.0,
        imaginary: 0.0,
        min_eigenvalue: 0.0,
        scale,
    };
    for &value in eigen.eigenvalues.iter() {
        trace.min_eigenvalue = trace.min_eigenvalue.min(value);
        if value >= 0.0 {
            trace.real += value.sqrt();
        } else if -value > noise_floor {
            trace.imaginary += (-value).sqrt();
        }
    }
    trace
}

/// Fréchet distance between two distribution summaries.
///
/// # Errors
/// - `ShapeMismatch` if the summaries have different dimensionality
/// - `NumericalInstability` if the imaginary part of `tr((Σa Σb)^½)` still
///   exceeds tolerance after the regularization retry
pub fn frechet_distance(
    a: &DistributionSummary,
    b: &DistributionSummary,
    options: &FrechetOptions,
) -> MetricResult<f64> {
    if a.dims() != b.dims() || a.covariance.dim() != b.covariance.dim() {
        return Err(MetricError::ShapeMismatch(format!(
            "cannot compare {}-dim and {}-dim summaries",
            a.dims(),
            b.dims()
        )));
    }

    let diff = &a.mean - &b.mean;
    let sigma_a = to_dmatrix(&a.covariance);
    let sigma_b = to_dmatrix(&b.covariance);

    let mut trace = trace_sqrt_product(&sigma_a, &sigma_b, options.singular_tolerance);
    if trace.is_singular() {
        warn!(
            eps = options.eps,
            min_eigenvalue = trace.min_eigenvalue,
            "singular covariance product; adding eps to diagonal"
        );
        let offset = DMatrix::<f64>::identity(a.dims(), a.dims()) * options.eps;
        trace = trace_sqrt_product(
            &(&sigma_a + &offset),
            &(&sigma_b + &offset),
            options.singular_tolerance,
        );
    }

    if trace.is_unstable(options.imaginary_tolerance) {
        return Err(MetricError::NumericalInstability {
            imaginary: trace.imaginary,
        });
    }

    Ok(diff.dot(&diff) + sigma_a.trace() + sigma_b.trace() - 2.0 * trace.real)
}

/// Lifecycle of one layer inside [`FidEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    /// No fake embeddings recorded.
    Empty,
    /// Embeddings recorded, but too few on one side to summarize.
    Accumulating,
    /// Both sides hold at least two rows.
    Finalizable,
    /// Distance computed; further pushes are rejected.
    Finalized,
}

/// Per-run FID state: a flat reference store and one store per fake layer.
///
/// Summaries are computed lazily from the concatenation of every stored batch
/// when [`FidEngine::compute_fid`] is called.
#[derive(Debug, Clone)]
pub struct FidEngine {
    options: FrechetOptions,
    real: Vec<EmbeddingMatrix>,
    fake: Vec<Vec<EmbeddingMatrix>>,
    scores: Vec<Option<f64>>,
}

impl FidEngine {
    /// Create an engine with one empty slot per layer.
    pub fn new(layer_num: usize, options: FrechetOptions) -> Self {
        Self {
            options,
            real: Vec::new(),
            fake: vec![Vec::new(); layer_num],
            scores: vec![None; layer_num],
        }
    }

    pub fn layer_num(&self) -> usize {
        self.fake.len()
    }

    fn check_layer(&self, layer: LayerIndex) -> MetricResult<()> {
        if layer >= self.fake.len() {
            return Err(MetricError::UnknownLayer {
                layer,
                layer_num: self.fake.len(),
            });
        }
        Ok(())
    }

    fn check_width(&self, batch: &EmbeddingMatrix, stored: &[EmbeddingMatrix]) -> MetricResult<()> {
        let reference = stored
            .first()
            .or_else(|| self.real.first())
            .or_else(|| self.fake.iter().flatten().next());
        match reference {
            Some(first) if first.ncols() != batch.ncols() => Err(MetricError::ShapeMismatch(
                format!("batch has {} dims, store holds {}", batch.ncols(), first.ncols()),
            )),
            _ => Ok(()),
        }
    }

    /// Append a batch of reference embeddings.
    pub fn push_real(&mut self, batch: EmbeddingMatrix) -> MetricResult<()> {
        self.check_width(&batch, &self.real)?;
        self.real.push(batch);
        Ok(())
    }

    /// Append a batch of generated embeddings for `layer`.
    ///
    /// # Errors
    /// - `UnknownLayer` for an index outside the engine
    /// - `LayerFinalized` once the layer's distance has been computed
    pub fn push_fake(&mut self, layer: LayerIndex, batch: EmbeddingMatrix) -> MetricResult<()> {
        self.check_layer(layer)?;
        if self.scores[layer].is_some() {
            return Err(MetricError::LayerFinalized(layer));
        }
        self.check_width(&batch, &self.fake[layer])?;
        self.fake[layer].push(batch);
        Ok(())
    }

    pub fn real_rows(&self) -> usize {
        self.real.iter().map(Array2::nrows).sum()
    }

    pub fn fake_rows(&self, layer: LayerIndex) -> MetricResult<usize> {
        self.check_layer(layer)?;
        Ok(self.fake[layer].iter().map(Array2::nrows).sum())
    }

    pub fn state(&self, layer: LayerIndex) -> MetricResult<LayerState> {
        let fake_rows = self.fake_rows(layer)?;
        Ok(if self.scores[layer].is_some() {
            LayerState::Finalized
        } else if fake_rows == 0 {
            LayerState::Empty
        } else if fake_rows >= 2 && self.real_rows() >= 2 {
            LayerState::Finalizable
        } else {
            LayerState::Accumulating
        })
    }

    /// Last distance computed for `layer`, if any.
    pub fn score(&self, layer: LayerIndex) -> Option<f64> {
        self.scores.get(layer).copied().flatten()
    }

    /// Summary of the concatenated reference store.
    pub fn real_summary(&self) -> MetricResult<DistributionSummary> {
        summarize(stacked(&self.real)?.view())
    }

    /// Summary of the concatenated store for `layer`.
    pub fn fake_summary(&self, layer: LayerIndex) -> MetricResult<DistributionSummary> {
        self.check_layer(layer)?;
        summarize(stacked(&self.fake[layer])?.view())
    }

    /// Fréchet distance between the reference set and `layer`.
    ///
    /// Both summaries are recomputed from scratch; the layer is finalized on
    /// success.
    pub fn compute_fid(&mut self, layer: LayerIndex) -> MetricResult<f64> {
        let real = self.real_summary()?;
        let fake = self.fake_summary(layer)?;
        let value = frechet_distance(&real, &fake, &self.options)?;

        debug!(layer, fid = value, "computed fid");
        self.scores[layer] = Some(value);
        Ok(value)
    }
}

/// Row-wise concatenation of stored batches.
fn stacked(batches: &[EmbeddingMatrix]) -> MetricResult<EmbeddingMatrix> {
    match batches {
        [] => Err(MetricError::InsufficientSamples {
            required: 2,
            actual: 0,
        }),
        [single] => Ok(single.clone()),
        _ => {
            let views: Vec<_> = batches.iter().map(Array2::view).collect();
            concatenate(Axis(0), &views).map_err(|e| MetricError::ShapeMismatch(e.to_string()))
        }
    }
}
