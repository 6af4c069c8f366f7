//! Preallocated destination matrix for streamed embedding batches.
//!
//! # Motivation
//!
//! The dataset length is known before the first batch is embedded, so the
//! full N×D matrix is allocated once and every batch is copied into its slot.
//! No intermediate `Vec` of batches and no reallocation while a pass runs.
//!
//! # Offsets
//!
//! `write(start, batch)` returns `start + batch.nrows()`, the offset of the next
//! batch. Callers thread that offset through a pass (or precompute one offset per
//! batch when batches are embedded concurrently). The buffer does not check
//! ordering, but every row may be written exactly once: a write that overlaps
//! rows already filled is rejected, so `finish` only succeeds once each row
//! holds data.

use crate::core::{EmbeddingMatrix, MetricError, MetricResult};
use ndarray::{s, Array2, ArrayView2};

/// Fixed-size embedding matrix filled batch by batch.
#[derive(Debug, Clone)]
pub struct EmbeddingBuffer {
    data: Array2<f64>,
    /// One flag per row
    filled: Vec<bool>,
    /// Distinct rows written so far
    written: usize,
}

impl EmbeddingBuffer {
    /// Reserve a zeroed `size × dim` matrix.
    pub fn allocate(size: usize, dim: usize) -> Self {
        Self {
            data: Array2::zeros((size, dim)),
            filled: vec![false; size],
            written: 0,
        }
    }

    /// Copy `batch` into rows `start..start + batch.nrows()`.
    ///
    /// # Returns
    /// The offset immediately after the written rows.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the batch width differs from the buffer width,
    ///   the rows would run past the end of the buffer, or any of them was
    ///   already written
    pub fn write(&mut self, start: usize, batch: ArrayView2<f64>) -> MetricResult<usize> {
        let (rows, dims) = self.data.dim();
        if batch.ncols() != dims {
            return Err(MetricError::ShapeMismatch(format!(
                "batch has {} columns, buffer expects {dims}",
                batch.ncols()
            )));
        }

        let end = start + batch.nrows();
        if end > rows {
            return Err(MetricError::ShapeMismatch(format!(
                "rows {start}..{end} exceed buffer of {rows}"
            )));
        }

        if let Some(row) = (start..end).find(|&r| self.filled[r]) {
            return Err(MetricError::ShapeMismatch(format!("row {row} already written")));
        }

        self.data.slice_mut(s![start..end, ..]).assign(&batch);
        self.filled[start..end].fill(true);
        self.written += batch.nrows();
        Ok(end)
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn dims(&self) -> usize {
        self.data.ncols()
    }

    /// Whether every row has been written.
    pub fn is_complete(&self) -> bool {
        self.written == self.data.nrows()
    }

    /// Hand the filled matrix over.
    ///
    /// # Errors
    /// - `ShapeMismatch` if some row was never written
    pub fn finish(self) -> MetricResult<EmbeddingMatrix> {
        if !self.is_complete() {
            return Err(MetricError::ShapeMismatch(format!(
                "{} of {} rows written",
                self.written,
                self.data.nrows()
            )));
        }
        Ok(self.data)
    }
}
