//! Precision, recall, density and coverage over k-NN manifolds.
//!
//! Every point owns a ball whose radius is the distance to its k-th nearest
//! neighbour inside its own set. With `d(f, r)` the Euclidean distance between
//! a fake point `f` and a real point `r`:
//!
//! ```text
//! precision = mean_f [ d(f, nn_real(f)) <= radius_real(nn_real(f)) ]
//! recall    = mean_r [ d(r, nn_fake(r)) <= radius_fake(nn_fake(r)) ]
//! density   = (1/k) · mean_r #{ f : d(f, r) <= radius_real(r) }
//! coverage  = mean_r [ ∃ f : d(f, r) <= radius_real(r) ]
//! ```
//!
//! Precision, recall and coverage lie in \[0, 1\]. Density has no upper bound:
//! it exceeds 1 wherever fake points crowd a real neighbourhood.

use crate::core::{ClassLabel, LayerIndex, MetricError, MetricResult};
use crate::utils::{kth_nearest_radii, mean, pairwise_distances, row_minima};
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The four manifold scores of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrdcScores {
    pub precision: f64,
    pub recall: f64,
    pub density: f64,
    pub coverage: f64,
}

/// Compare two embedding sets with neighbourhood size `k`.
///
/// # Errors
/// - `InvalidConfig` if `k` is zero
/// - `InsufficientSamples` if either set has `k` or fewer points
/// - `ShapeMismatch` if the sets differ in dimensionality
#[allow(clippy::cast_precision_loss)]
pub fn compute_prdc(
    real: ArrayView2<f64>,
    fake: ArrayView2<f64>,
    k: usize,
) -> MetricResult<PrdcScores> {
    if k == 0 {
        return Err(MetricError::InvalidConfig(
            "neighbour count k must be at least 1".to_string(),
        ));
    }
    for n in [real.nrows(), fake.nrows()] {
        if n <= k {
            return Err(MetricError::InsufficientSamples {
                required: k + 1,
                actual: n,
            });
        }
    }

    let radii_real = kth_nearest_radii(&pairwise_distances(real, real)?, k)?;
    let radii_fake = kth_nearest_radii(&pairwise_distances(fake, fake)?, k)?;

    // (n_fake, n_real)
    let fake_to_real = pairwise_distances(fake, real)?;
    let n_fake = fake.nrows() as f64;
    let n_real = real.nrows() as f64;

    let (min_fake_to_real, nn_real) = row_minima(fake_to_real.view());
    let precision = min_fake_to_real
        .iter()
        .zip(&nn_real)
        .filter(|&(&d, &j)| d <= radii_real[j])
        .count() as f64
        / n_fake;

    let (min_real_to_fake, nn_fake) = row_minima(fake_to_real.t());
    let recall = min_real_to_fake
        .iter()
        .zip(&nn_fake)
        .filter(|&(&d, &i)| d <= radii_fake[i])
        .count() as f64
        / n_real;

    // Fake points inside each real point's ball.
    let inside: Vec<usize> = fake_to_real
        .axis_iter(Axis(1))
        .zip(radii_real.iter())
        .map(|(column, &radius)| column.iter().filter(|&&d| d <= radius).count())
        .collect();

    let density = inside.iter().sum::<usize>() as f64 / n_real / k as f64;
    let coverage = inside.iter().filter(|&&c| c > 0).count() as f64 / n_real;

    Ok(PrdcScores {
        precision,
        recall,
        density,
        coverage,
    })
}

/// One recorded comparison inside a layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassResult {
    pub class: ClassLabel,
    pub scores: PrdcScores,
}

/// Per-run PRDC state: an append-only list of class results per layer.
#[derive(Debug, Clone)]
pub struct PrdcEngine {
    k: usize,
    results: Vec<Vec<ClassResult>>,
}

impl PrdcEngine {
    /// Create an engine with one empty list per layer and default neighbour count `k`.
    pub fn new(layer_num: usize, k: usize) -> Self {
        Self {
            k,
            results: vec![Vec::new(); layer_num],
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn layer_num(&self) -> usize {
        self.results.len()
    }

    fn check_layer(&self, layer: LayerIndex) -> MetricResult<()> {
        if layer >= self.results.len() {
            return Err(MetricError::UnknownLayer {
                layer,
                layer_num: self.results.len(),
            });
        }
        Ok(())
    }

    /// Score one (layer, class) comparison and record it.
    ///
    /// `k` overrides the engine's neighbour count for this comparison only.
    /// Failed comparisons leave the layer's list untouched.
    pub fn compute_metric(
        &mut self,
        layer: LayerIndex,
        class: ClassLabel,
        k: Option<usize>,
        real: ArrayView2<f64>,
        fake: ArrayView2<f64>,
    ) -> MetricResult<PrdcScores> {
        self.check_layer(layer)?;
        let k = k.unwrap_or(self.k);
        let scores = compute_prdc(real, fake, k)?;
        debug!(
            layer,
            class = ?class,
            k,
            precision = scores.precision,
            recall = scores.recall,
            density = scores.density,
            coverage = scores.coverage,
            "computed prdc"
        );
        self.results[layer].push(ClassResult { class, scores });
        Ok(scores)
    }

    /// Record externally computed scores for a layer.
    pub fn record(
        &mut self,
        layer: LayerIndex,
        class: ClassLabel,
        scores: PrdcScores,
    ) -> MetricResult<()> {
        self.check_layer(layer)?;
        self.results[layer].push(ClassResult { class, scores });
        Ok(())
    }

    pub fn results(&self, layer: LayerIndex) -> MetricResult<&[ClassResult]> {
        self.check_layer(layer)?;
        Ok(&self.results[layer])
    }

    /// Mean of every recorded score for `layer`.
    ///
    /// # Errors
    /// - `EmptyAggregate` if nothing was recorded for the layer
    pub fn aggregate(&self, layer: LayerIndex) -> MetricResult<PrdcScores> {
        let results = self.results(layer)?;
        let field = |f: fn(&PrdcScores) -> f64| {
            let values: Vec<f64> = results.iter().map(|r| f(&r.scores)).collect();
            mean(&values).ok_or(MetricError::EmptyAggregate { layer })
        };

        Ok(PrdcScores {
            precision: field(|s| s.precision)?,
            recall: field(|s| s.recall)?,
            density: field(|s| s.density)?,
            coverage: field(|s| s.coverage)?,
        })
    }
}
