//! The generic two-way join on a single shared variable.

use std::sync::OnceLock;

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::ops::join_common::{compute_zipper_join, join_variable_columns, join_variable_names};
use crate::result::QueryResult;
use crate::tree::{QueryExecutionTree, SharedTree};
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Symmetric join. The constructor canonicalizes the child order (the child
/// with the lexicographically smaller cache key goes left), so `A ⋈ B` and
/// `B ⋈ A` produce identical cache keys and hit the same cache entry.
pub struct Join {
    ctx: SharedExecutionContext,
    left: SharedTree,
    right: SharedTree,
    join_column: (ColumnIndex, ColumnIndex),
    estimates: OnceLock<(usize, f32)>,
}

impl Join {
    pub fn new(
        ctx: SharedExecutionContext,
        t1: SharedTree,
        t2: SharedTree,
    ) -> Result<Self, QueryError> {
        let (t1, t2) = if t1.cache_key() > t2.cache_key() {
            (t2, t1)
        } else {
            (t1, t2)
        };
        let (left, right, join_columns) =
            QueryExecutionTree::sorted_subtrees_and_join_columns(t1, t2)?;
        if join_columns.len() != 1 {
            return Err(QueryError::Plan(format!(
                "generic join expects exactly one shared variable, found {}",
                join_columns.len()
            )));
        }
        Ok(Self {
            ctx,
            left,
            right,
            join_column: join_columns[0],
            estimates: OnceLock::new(),
        })
    }

    /// `(size, result multiplicity)` following the usual distinct-value
    /// argument: the join has at most `min(distinct_left, distinct_right)`
    /// distinct keys, each contributing the product of the sides'
    /// multiplicities.
    fn size_and_multiplicity(&self) -> (usize, f32) {
        *self.estimates.get_or_init(|| {
            let (lc, rc) = self.join_column;
            let mult_left = self.left.multiplicity(lc).max(1.0);
            let mult_right = self.right.multiplicity(rc).max(1.0);
            let distinct_left = (self.left.size_estimate() as f32 / mult_left).max(1.0);
            let distinct_right = (self.right.size_estimate() as f32 / mult_right).max(1.0);
            let distinct = distinct_left.min(distinct_right);
            let multiplicity = mult_left * mult_right;
            ((multiplicity * distinct) as usize + 1, multiplicity)
        })
    }
}

impl Operation for Join {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        format!(
            "Join on {}",
            join_variable_names(&self.left, &[self.join_column])
        )
    }

    fn cache_key_impl(&self) -> String {
        format!(
            "JOIN\n{} join-column: [{}]\n|X|\n{} join-column: [{}]",
            self.left.cache_key(),
            self.join_column.0,
            self.right.cache_key(),
            self.join_column.1
        )
    }

    fn result_width(&self) -> usize {
        self.left.result_width() + self.right.result_width() - 1
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        vec![self.join_column.0]
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        // Forward the source column's multiplicity scaled by the join's.
        let (_, mult) = self.size_and_multiplicity();
        let left_width = self.left.result_width();
        if column < left_width {
            self.left.multiplicity(column).max(1.0) * mult.sqrt()
        } else {
            mult.sqrt()
        }
    }

    fn size_estimate(&self) -> usize {
        self.size_and_multiplicity().0
    }

    fn cost_estimate(&self) -> usize {
        self.left.cost_estimate()
            + self.right.cost_estimate()
            + self.size_estimate()
            + self.left.size_estimate()
            + self.right.size_estimate()
    }

    fn variable_columns(&self) -> VariableColumnMap {
        join_variable_columns(&self.left, &self.right, &[self.join_column])
    }

    fn known_empty_result(&self) -> bool {
        self.left.known_empty_result() || self.right.known_empty_result()
    }

    fn children(&self) -> Vec<&SharedTree> {
        vec![&self.left, &self.right]
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(Join {
            ctx: self.ctx.clone(),
            left: self.left.deep_clone(),
            right: self.right.deep_clone(),
            join_column: self.join_column,
            estimates: OnceLock::new(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        compute_zipper_join(&self.ctx, &self.left, &self.right, &[self.join_column], false)
    }
}
