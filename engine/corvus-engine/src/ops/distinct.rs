//! Duplicate elimination over a sorted input.

use corvus_core::IdTable;

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Linear dedup. The planner guarantees the child is sorted on all columns,
/// so equal rows are adjacent.
pub struct Distinct {
    ctx: SharedExecutionContext,
    child: SharedTree,
}

impl Distinct {
    pub fn new(ctx: SharedExecutionContext, child: SharedTree) -> Self {
        Self { ctx, child }
    }
}

impl Operation for Distinct {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        "Distinct".into()
    }

    fn cache_key_impl(&self) -> String {
        format!("DISTINCT\n{}", self.child.cache_key())
    }

    fn result_width(&self) -> usize {
        self.child.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.child.result_sorted_on()
    }

    fn multiplicity(&self, _column: ColumnIndex) -> f32 {
        1.0
    }

    fn size_estimate(&self) -> usize {
        self.child.size_estimate()
    }

    fn cost_estimate(&self) -> usize {
        self.child.cost_estimate() + self.size_estimate()
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
        Box::new(Distinct {
            ctx: self.ctx.clone(),
            child: self.child.deep_clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        let input = self.child.get_result(false)?;
        self.ctx.check_cancellation()?;
        let source = input.id_table();
        let all_columns: Vec<ColumnIndex> = (0..source.num_columns()).collect();
        let mut table = IdTable::with_columns(source.num_columns(), self.ctx.allocator().clone());
        for row in 0..source.num_rows() {
            if row == 0
                || source.cmp_rows_on(row - 1, row, &all_columns) != std::cmp::Ordering::Equal
            {
                table.push_row(&source.row(row))?;
            }
            if row % 4096 == 0 {
                self.ctx.check_cancellation()?;
            }
        }
        Ok(QueryResult::new(
            table,
            self.result_sorted_on(),
            input.local_vocab().clone(),
        ))
    }
}
