//! Row-wise predicate evaluation.

use corvus_core::IdTable;

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::expr::{BoundExpression, Expression};
use crate::operation::Operation;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, VariableColumnMap};

pub struct Filter {
    ctx: SharedExecutionContext,
    child: SharedTree,
    /// Kept for cloning; the bound form below does the work.
    expression: Expression,
    bound: BoundExpression,
}

impl Filter {
    pub fn new(
        ctx: SharedExecutionContext,
        child: SharedTree,
        expression: Expression,
    ) -> Result<Self, QueryError> {
        let bound = expression.bind(&child.variable_columns())?;
        Ok(Self {
            ctx,
            child,
            expression,
            bound,
        })
    }
}

impl Operation for Filter {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        format!("Filter {}", self.bound)
    }

    fn cache_key_impl(&self) -> String {
        format!("FILTER {}\n{}", self.bound.cache_key(), self.child.cache_key())
    }

    fn result_width(&self) -> usize {
        self.child.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        // Filtering drops rows but never reorders them.
        self.child.result_sorted_on()
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        self.child.multiplicity(column)
    }

    fn size_estimate(&self) -> usize {
        (self.child.size_estimate() / 2).max(1)
    }

    fn cost_estimate(&self) -> usize {
        self.child.cost_estimate() + self.child.size_estimate()
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
        let child = self.child.deep_clone();
        let clone = Filter::new(self.ctx.clone(), child, self.expression.clone())
            .expect("a bound filter re-binds against an identical child");
        Box::new(clone)
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        let input = self.child.get_result(false)?;
        self.ctx.check_cancellation()?;
        let source = input.id_table();
        let vocab = input.local_vocab();
        let mut table = IdTable::with_columns(source.num_columns(), self.ctx.allocator().clone());
        for row in 0..source.num_rows() {
            if self.bound.keeps_row(source, row, vocab) {
                table.push_row(&source.row(row))?;
            }
            if row % 1024 == 0 {
                self.ctx.check_cancellation()?;
            }
        }
        tracing::debug!(
            input_rows = source.num_rows(),
            output_rows = table.num_rows(),
            "filter evaluated"
        );
        Ok(QueryResult::new(
            table,
            self.result_sorted_on(),
            vocab.clone(),
        ))
    }
}
