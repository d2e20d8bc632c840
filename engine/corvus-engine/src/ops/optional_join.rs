//! Left-outer join (SPARQL OPTIONAL).

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::ops::join_common::{compute_zipper_join, join_variable_columns, join_variable_names};
use crate::result::QueryResult;
use crate::tree::{QueryExecutionTree, SharedTree};
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Every left row survives; unmatched ones get UNDEF in the right-only
/// columns. Not commutative, so no child canonicalization.
pub struct OptionalJoin {
    ctx: SharedExecutionContext,
    left: SharedTree,
    right: SharedTree,
    join_columns: Vec<(ColumnIndex, ColumnIndex)>,
}

impl OptionalJoin {
    pub fn new(
        ctx: SharedExecutionContext,
        t1: SharedTree,
        t2: SharedTree,
    ) -> Result<Self, QueryError> {
        let (left, right, join_columns) =
            QueryExecutionTree::sorted_subtrees_and_join_columns(t1, t2)?;
        Ok(Self {
            ctx,
            left,
            right,
            join_columns,
        })
    }
}

impl Operation for OptionalJoin {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        format!(
            "OptionalJoin on {}",
            join_variable_names(&self.left, &self.join_columns)
        )
    }

    fn cache_key_impl(&self) -> String {
        let left_cols: Vec<String> = self.join_columns.iter().map(|(l, _)| l.to_string()).collect();
        let right_cols: Vec<String> =
            self.join_columns.iter().map(|(_, r)| r.to_string()).collect();
        format!(
            "OPTIONAL_JOIN\n{} join-columns: [{}]\n|X|\n{} join-columns: [{}]",
            self.left.cache_key(),
            left_cols.join(" & "),
            self.right.cache_key(),
            right_cols.join(" & ")
        )
    }

    fn result_width(&self) -> usize {
        self.left.result_width() + self.right.result_width() - self.join_columns.len()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.join_columns.iter().map(|&(l, _)| l).collect()
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        if column < self.left.result_width() {
            self.left.multiplicity(column)
        } else {
            1.0
        }
    }

    fn size_estimate(&self) -> usize {
        // At least every left row, plus the inner matches.
        self.left.size_estimate()
            + (self.left.size_estimate().min(self.right.size_estimate()) / 2)
    }

    fn cost_estimate(&self) -> usize {
        self.left.cost_estimate()
            + self.right.cost_estimate()
            + self.size_estimate()
            + self.left.size_estimate()
            + self.right.size_estimate()
    }

    fn variable_columns(&self) -> VariableColumnMap {
        join_variable_columns(&self.left, &self.right, &self.join_columns)
    }

    fn known_empty_result(&self) -> bool {
        self.left.known_empty_result()
    }

    fn children(&self) -> Vec<&SharedTree> {
        vec![&self.left, &self.right]
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(OptionalJoin {
            ctx: self.ctx.clone(),
            left: self.left.deep_clone(),
            right: self.right.deep_clone(),
            join_columns: self.join_columns.clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        compute_zipper_join(&self.ctx, &self.left, &self.right, &self.join_columns, true)
    }
}
