//! Rough wall-time model for sorts.
//!
//! Sorting a huge intermediate result can single-handedly blow a query's
//! time budget. The estimator projects sort time from row and column counts
//! with flat per-element constants so the sort operator can refuse work
//! that cannot finish in time. The constants are deliberately pessimistic;
//! a refused sort is an error the client can retry with a higher limit.

use std::time::Duration;

use serde::Serialize;

/// Estimated nanoseconds to move one id during a sort.
const NANOS_PER_ID: f64 = 4.0;
/// Comparison overhead grows with the sort width.
const NANOS_PER_KEY_COLUMN: f64 = 2.5;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SortPerformanceEstimator;

impl SortPerformanceEstimator {
    /// Projected wall time for sorting `num_rows` rows of `num_columns`.
    pub fn estimate(&self, num_rows: usize, num_columns: usize) -> Duration {
        if num_rows < 2 {
            return Duration::ZERO;
        }
        let n = num_rows as f64;
        let per_row = num_columns as f64 * NANOS_PER_ID + num_columns as f64 * NANOS_PER_KEY_COLUMN;
        let nanos = n * n.log2() * per_row;
        Duration::from_nanos(nanos as u64)
    }

    /// True iff a sort of this size is expected to finish within `budget`.
    pub fn fits_within(&self, num_rows: usize, num_columns: usize, budget: Duration) -> bool {
        self.estimate(num_rows, num_columns) <= budget
    }
}
