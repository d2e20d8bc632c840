//! Stable sort by a column list.

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, VariableColumnMap};

pub struct Sort {
    ctx: SharedExecutionContext,
    child: SharedTree,
    columns: Vec<ColumnIndex>,
}

impl Sort {
    pub fn new(ctx: SharedExecutionContext, child: SharedTree, columns: Vec<ColumnIndex>) -> Self {
        debug_assert!(columns.iter().all(|&c| c < child.result_width()));
        Self {
            ctx,
            child,
            columns,
        }
    }
}

impl Operation for Sort {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        format!("Sort on columns [{}]", cols.join(", "))
    }

    fn cache_key_impl(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        format!("SORT on [{}]\n{}", cols.join(" "), self.child.cache_key())
    }

    fn result_width(&self) -> usize {
        self.child.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.columns.clone()
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        self.child.multiplicity(column)
    }

    fn size_estimate(&self) -> usize {
        self.child.size_estimate()
    }

    fn cost_estimate(&self) -> usize {
        let size = self.size_estimate();
        let log = (size.max(2) as f64).log2().ceil() as usize;
        self.child.cost_estimate() + size * log
    }

    fn variable_columns(&self) -> VariableColumnMap {
        self.child.variable_columns()
    }

    fn known_empty_result(&self) -> bool {
        self.child.known_empty_result()
    }

    fn children(&self) -> Vec<&SharedTree> {
        vec![&self.child]
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(Sort {
            ctx: self.ctx.clone(),
            child: self.child.deep_clone(),
            columns: self.columns.clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        let input = self.child.get_result(false)?;
        self.ctx.check_cancellation()?;
        let rows = input.id_table().num_rows();
        let width = input.id_table().num_columns();
        if !self
            .ctx
            .sort_estimator()
            .fits_within(rows, width, self.ctx.time_limit())
        {
            return Err(QueryError::Plan(format!(
                "sorting {rows} rows of {width} columns is expected to exceed the time limit"
            )));
        }
        tracing::debug!(rows, width, "sorting");
        let mut table = input.id_table().try_clone()?;
        table.sort_by_columns(&self.columns);
        self.ctx.check_cancellation()?;
        Ok(QueryResult::new(
            table,
            self.columns.clone(),
            input.local_vocab().clone(),
        ))
    }
}
