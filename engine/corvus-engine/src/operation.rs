//! The physical operator contract.
//!
//! Operators are value-like and deterministic: two operations with equal
//! cache keys produce equal results, which is what makes the result cache
//! sound. The trait keeps inheritance flat on purpose; shared behavior
//! (cache lookup, cancellation probes, runtime bookkeeping) lives in
//! [`QueryExecutionTree`](crate::tree::QueryExecutionTree), not in a base
//! class hierarchy.

use serde::Serialize;

use crate::cache::CacheStatus;
use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, VariableColumnMap};

/// One node of the physical plan.
pub trait Operation: Send + Sync {
    /// The per-query context the operator was built for.
    fn execution_context(&self) -> &SharedExecutionContext;

    /// Human-readable one-liner for runtime information and logs.
    fn descriptor(&self) -> String;

    /// Canonical cache key of this operator, derived recursively from its
    /// kind, its parameters and the children's cache keys. Structurally
    /// equivalent subtrees must collide; parameters must be serialized
    /// canonically (locale-independent) so keys are byte-stable.
    fn cache_key_impl(&self) -> String;

    /// Number of columns of the result.
    fn result_width(&self) -> usize;

    /// Columns the result is sorted on, in significance order.
    fn result_sorted_on(&self) -> Vec<ColumnIndex>;

    /// Expected number of rows per distinct value of `column`.
    fn multiplicity(&self, column: ColumnIndex) -> f32;

    /// Estimated result rows before any limit.
    fn size_estimate(&self) -> usize;

    /// Abstract cost units, composed additively over the subtree.
    fn cost_estimate(&self) -> usize;

    /// Which result column binds which variable.
    fn variable_columns(&self) -> VariableColumnMap;

    /// True iff the result is known to be empty without computing it.
    fn known_empty_result(&self) -> bool {
        false
    }

    /// Child subtrees, left to right.
    fn children(&self) -> Vec<&SharedTree>;

    /// Deep copy, children included.
    fn clone_operation(&self) -> Box<dyn Operation>;

    /// Compute the result by driving the children. Called at most once per
    /// cache key; the caching wrapper lives on the execution tree.
    fn compute_result(&self) -> Result<QueryResult, QueryError>;
}

/// Per-operation execution record, assembled into a tree mirroring the
/// plan. Serialized into the query response metadata.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInformation {
    pub descriptor: String,
    /// `None` until the operation has run (or was served from cache).
    pub cache_status: Option<CacheStatus>,
    pub total_time_ms: u64,
    pub result_rows: usize,
    pub result_cols: usize,
    pub children: Vec<RuntimeInformation>,
}

impl RuntimeInformation {
    pub fn not_yet_executed(descriptor: String) -> Self {
        Self {
            descriptor,
            cache_status: None,
            total_time_ms: 0,
            result_rows: 0,
            result_cols: 0,
            children: Vec::new(),
        }
    }
}
