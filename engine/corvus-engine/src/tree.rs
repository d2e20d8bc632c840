//! The query execution tree: plan nodes plus the caching entry point.
//!
//! A tree node owns its [`Operation`], memoizes the canonical cache key and
//! records runtime information. Subtrees are held by `Arc`, so shared
//! subplans form a DAG; children never point back at parents.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::QueryError;
use crate::operation::{Operation, RuntimeInformation};
use crate::ops::Sort;
use crate::result::SharedResult;
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Shared-ownership handle under which subtrees travel.
pub type SharedTree = Arc<QueryExecutionTree>;

pub struct QueryExecutionTree {
    operation: Box<dyn Operation>,
    cache_key: OnceLock<String>,
    runtime_info: Mutex<RuntimeInformation>,
}

impl QueryExecutionTree {
    pub fn new(operation: Box<dyn Operation>) -> SharedTree {
        let runtime_info = RuntimeInformation::not_yet_executed(operation.descriptor());
        Arc::new(Self {
            operation,
            cache_key: OnceLock::new(),
            runtime_info: Mutex::new(runtime_info),
        })
    }

    pub fn operation(&self) -> &dyn Operation {
        self.operation.as_ref()
    }

    /// The canonical cache key, computed once.
    pub fn cache_key(&self) -> &str {
        self.cache_key
            .get_or_init(|| self.operation.cache_key_impl())
    }

    /// Short hex fingerprint of the cache key for log lines.
    pub fn cache_key_fingerprint(&self) -> String {
        let digest = Sha256::digest(self.cache_key().as_bytes());
        hex_prefix(&digest, 8)
    }

    pub fn result_width(&self) -> usize {
        self.operation.result_width()
    }

    pub fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.operation.result_sorted_on()
    }

    pub fn variable_columns(&self) -> VariableColumnMap {
        self.operation.variable_columns()
    }

    pub fn multiplicity(&self, column: ColumnIndex) -> f32 {
        self.operation.multiplicity(column)
    }

    pub fn size_estimate(&self) -> usize {
        self.operation.size_estimate()
    }

    pub fn cost_estimate(&self) -> usize {
        self.operation.cost_estimate()
    }

    pub fn known_empty_result(&self) -> bool {
        self.operation.known_empty_result()
    }

    /// Deep copy of the whole tree.
    pub fn deep_clone(&self) -> SharedTree {
        QueryExecutionTree::new(self.operation.clone_operation())
    }

    /// Compute or fetch this subtree's result.
    ///
    /// Consults the result cache under the canonical cache key; the
    /// operation itself runs at most once per key across all concurrent
    /// queries. `is_root` applies the stronger root pinning request.
    pub fn get_result(&self, is_root: bool) -> Result<SharedResult, QueryError> {
        let ctx = self.operation.execution_context();
        ctx.check_cancellation()?;
        let pin_mode = ctx.pin();
        let pin = pin_mode.pin_subtrees || (is_root && pin_mode.pin_result);
        let started = Instant::now();
        let outcome = ctx.cache().compute_if_absent(self.cache_key(), pin, || {
            tracing::debug!(
                operation = %self.operation.descriptor(),
                key = %self.cache_key_fingerprint(),
                "computing result"
            );
            let result = self.operation.compute_result()?;
            ctx.check_cancellation()?;
            Ok(Arc::new(result))
        });
        match outcome {
            Ok((result, status)) => {
                let mut info = self.runtime_info.lock();
                info.cache_status = Some(status);
                info.total_time_ms = started.elapsed().as_millis() as u64;
                info.result_rows = result.id_table().num_rows();
                info.result_cols = result.id_table().num_columns();
                Ok(result)
            }
            Err(err) => {
                tracing::debug!(
                    operation = %self.operation.descriptor(),
                    error = %err,
                    "result computation failed"
                );
                Err(err)
            }
        }
    }

    /// Snapshot of the execution record for this subtree.
    pub fn runtime_information(&self) -> RuntimeInformation {
        let mut info = self.runtime_info.lock().clone();
        info.children = self
            .operation
            .children()
            .iter()
            .map(|child| child.runtime_information())
            .collect();
        info
    }

    /// Prepare two subtrees for a join: derive the join columns from their
    /// shared variables in canonical order and insert sorts where a child
    /// is not already sorted on its join column prefix.
    pub fn sorted_subtrees_and_join_columns(
        t1: SharedTree,
        t2: SharedTree,
    ) -> Result<(SharedTree, SharedTree, Vec<(ColumnIndex, ColumnIndex)>), QueryError> {
        let left_vars = t1.variable_columns();
        let right_vars = t2.variable_columns();
        let mut join_columns: Vec<(ColumnIndex, ColumnIndex)> = left_vars
            .iter()
            .filter_map(|(var, &left_col)| {
                right_vars.get(var).map(|&right_col| (left_col, right_col))
            })
            .collect();
        if join_columns.is_empty() {
            return Err(QueryError::Plan(
                "join without a shared variable (cartesian products are not supported)".into(),
            ));
        }
        join_columns.sort_unstable();
        let left_cols: Vec<_> = join_columns.iter().map(|&(l, _)| l).collect();
        let right_cols: Vec<_> = join_columns.iter().map(|&(_, r)| r).collect();
        let t1 = Self::ensure_sorted_on(t1, &left_cols);
        let t2 = Self::ensure_sorted_on(t2, &right_cols);
        Ok((t1, t2, join_columns))
    }

    pub(crate) fn ensure_sorted_on(tree: SharedTree, columns: &[ColumnIndex]) -> SharedTree {
        if tree.result_sorted_on().starts_with(columns) {
            return tree;
        }
        let ctx = tree.operation().execution_context().clone();
        QueryExecutionTree::new(Box::new(Sort::new(ctx, tree, columns.to_vec())))
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len)
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl std::fmt::Debug for QueryExecutionTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutionTree")
            .field("descriptor", &self.operation.descriptor())
            .field("width", &self.operation.result_width())
            .finish()
    }
}
