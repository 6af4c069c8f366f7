//! Distance kernels and small numeric helpers.

use crate::core::{MetricError, MetricResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Euclidean distance between two vectors of equal length.
#[inline]
pub fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Pairwise Euclidean distances, shape `(a.nrows(), b.nrows())`.
///
/// Computed pair by pair rather than through the `|a|² + |b|² - 2ab` expansion so
/// that a point's distance to itself is exactly zero and `d(a, b) == d(b, a)`.
/// Output rows are filled in parallel.
///
/// # Errors
/// - `ShapeMismatch` if the two sets have different dimensionality
pub fn pairwise_distances(a: ArrayView2<f64>, b: ArrayView2<f64>) -> MetricResult<Array2<f64>> {
    if a.ncols() != b.ncols() {
        return Err(MetricError::ShapeMismatch(format!(
            "cannot compare {}-dim and {}-dim embeddings",
            a.ncols(),
            b.ncols()
        )));
    }

    let mut out = Array2::zeros((a.nrows(), b.nrows()));
    Zip::from(out.rows_mut())
        .and(a.rows())
        .par_for_each(|mut out_row, a_row| {
            for (d, b_row) in out_row.iter_mut().zip(b.rows()) {
                *d = euclidean(a_row, b_row);
            }
        });

    Ok(out)
}

/// Distance from every row's point to its k-th nearest neighbour.
///
/// `distances` must be a square self-distance matrix: each row contains the
/// zero self-distance, so the k-th true neighbour sits at sorted index `k`.
///
/// # Errors
/// - `InsufficientSamples` if the set has `k` or fewer points
pub fn kth_nearest_radii(distances: &Array2<f64>, k: usize) -> MetricResult<Array1<f64>> {
    let n = distances.ncols();
    if n <= k {
        return Err(MetricError::InsufficientSamples {
            required: k + 1,
            actual: n,
        });
    }

    let radii = distances
        .axis_iter(Axis(0))
        .map(|row| {
            let mut sorted = row.to_vec();
            // Partial selection yields the same value as a full ascending sort at index k.
            let (_, kth, _) = sorted.select_nth_unstable_by(k, f64::total_cmp);
            *kth
        })
        .collect::<Vec<_>>();

    Ok(Array1::from(radii))
}

/// Minimum of every row and the column where it occurs (first one on ties).
pub fn row_minima(distances: ArrayView2<f64>) -> (Array1<f64>, Vec<usize>) {
    let mut mins = Array1::from_elem(distances.nrows(), f64::INFINITY);
    let mut args = vec![0usize; distances.nrows()];

    for (i, row) in distances.axis_iter(Axis(0)).enumerate() {
        for (j, &d) in row.iter().enumerate() {
            if d < mins[i] {
                mins[i] = d;
                args[i] = j;
            }
        }
    }

    (mins, args)
}

/// Arithmetic mean of a slice; `None` when empty.
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
