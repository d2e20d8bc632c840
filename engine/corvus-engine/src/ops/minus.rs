//! Anti-join (SPARQL MINUS).

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::ops::join_common::{compute_minus, join_variable_names};
use crate::result::QueryResult;
use crate::tree::{QueryExecutionTree, SharedTree};
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Keeps the left rows that have no UNDEF-aware partner on the right.
/// The result has exactly the left child's columns.
pub struct Minus {
    ctx: SharedExecutionContext,
    left: SharedTree,
    right: SharedTree,
    join_columns: Vec<(ColumnIndex, ColumnIndex)>,
}

impl Minus {
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

impl Operation for Minus {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        format!(
            "Minus on {}",
            join_variable_names(&self.left, &self.join_columns)
        )
    }

    fn cache_key_impl(&self) -> String {
        let left_cols: Vec<String> = self.join_columns.iter().map(|(l, _)| l.to_string()).collect();
        let right_cols: Vec<String> =
            self.join_columns.iter().map(|(_, r)| r.to_string()).collect();
        format!(
            "MINUS\n{} join-columns: [{}]\n\\\n{} join-columns: [{}]",
            self.left.cache_key(),
            left_cols.join(" & "),
            self.right.cache_key(),
            right_cols.join(" & ")
        )
    }

    fn result_width(&self) -> usize {
        self.left.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.left.result_sorted_on()
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        self.left.multiplicity(column)
    }

    fn size_estimate(&self) -> usize {
        self.left.size_estimate()
    }

    fn cost_estimate(&self) -> usize {
        self.left.cost_estimate()
            + self.right.cost_estimate()
            + self.left.size_estimate()
            + self.right.size_estimate()
    }

    fn variable_columns(&self) -> VariableColumnMap {
        self.left.variable_columns()
    }

    fn known_empty_result(&self) -> bool {
        self.left.known_empty_result()
    }

    fn children(&self) -> Vec<&SharedTree> {
        vec![&self.left, &self.right]
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(Minus {
            ctx: self.ctx.clone(),
            left: self.left.deep_clone(),
            right: self.right.deep_clone(),
            join_columns: self.join_columns.clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        compute_minus(&self.ctx, &self.left, &self.right, &self.join_columns)
    }
}
