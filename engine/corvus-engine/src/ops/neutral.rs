//! The neutral element of joins: one row, zero columns.

use corvus_core::{IdTable, LocalVocab};

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Produced by the planner for degenerate group graph patterns.
pub struct NeutralElement {
    ctx: SharedExecutionContext,
}

impl NeutralElement {
    pub fn new(ctx: SharedExecutionContext) -> Self {
        Self { ctx }
    }
}

impl Operation for NeutralElement {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        "NeutralElement".into()
    }

    fn cache_key_impl(&self) -> String {
        "NEUTRAL_ELEMENT".into()
    }

    fn result_width(&self) -> usize {
        0
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        Vec::new()
    }

    fn multiplicity(&self, _column: ColumnIndex) -> f32 {
        1.0
    }

    fn size_estimate(&self) -> usize {
        1
    }

    fn cost_estimate(&self) -> usize {
        1
    }

    fn variable_columns(&self) -> VariableColumnMap {
        VariableColumnMap::new()
    }

    fn children(&self) -> Vec<&SharedTree> {
        Vec::new()
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(NeutralElement {
            ctx: self.ctx.clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        let mut table = IdTable::with_columns(0, self.ctx.allocator().clone());
        table.push_row(&[])?;
        Ok(QueryResult::new(table, Vec::new(), LocalVocab::new()))
    }
}
