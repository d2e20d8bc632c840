//! Union of two compatible inputs.

use corvus_core::{IdTable, LocalVocab};

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Concatenates the child results. When both children are sorted on the
/// same column list the inputs are merged instead, so the sort order
/// survives; otherwise the result reports no sort order.
pub struct Union {
    ctx: SharedExecutionContext,
    left: SharedTree,
    right: SharedTree,
}

impl Union {
    pub fn new(
        ctx: SharedExecutionContext,
        left: SharedTree,
        right: SharedTree,
    ) -> Result<Self, QueryError> {
        if left.variable_columns() != right.variable_columns() {
            return Err(QueryError::Plan(
                "union inputs must bind the same variables to the same columns".into(),
            ));
        }
        Ok(Self { ctx, left, right })
    }

    fn common_sort_order(&self) -> Vec<ColumnIndex> {
        let left = self.left.result_sorted_on();
        if !left.is_empty() && left == self.right.result_sorted_on() {
            left
        } else {
            Vec::new()
        }
    }
}

impl Operation for Union {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        "Union".into()
    }

    fn cache_key_impl(&self) -> String {
        format!(
            "UNION\n{}\n{}",
            self.left.cache_key(),
            self.right.cache_key()
        )
    }

    fn result_width(&self) -> usize {
        self.left.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        self.common_sort_order()
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        self.left
            .multiplicity(column)
            .max(self.right.multiplicity(column))
    }

    fn size_estimate(&self) -> usize {
        self.left.size_estimate() + self.right.size_estimate()
    }

    fn cost_estimate(&self) -> usize {
        self.left.cost_estimate() + self.right.cost_estimate() + self.size_estimate()
    }

    fn variable_columns(&self) -> VariableColumnMap {
        self.left.variable_columns()
    }

    fn known_empty_result(&self) -> bool {
        self.left.known_empty_result() && self.right.known_empty_result()
    }

    fn children(&self) -> Vec<&SharedTree> {
        vec![&self.left, &self.right]
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(Union {
            ctx: self.ctx.clone(),
            left: self.left.deep_clone(),
            right: self.right.deep_clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        let left = self.left.get_result(false)?;
        let right = self.right.get_result(false)?;
        self.ctx.check_cancellation()?;
        let sort_order = self.common_sort_order();
        let left_table = left.id_table();
        let right_table = right.id_table();
        let mut table = IdTable::with_columns(self.result_width(), self.ctx.allocator().clone());
        if sort_order.is_empty() {
            for row in 0..left_table.num_rows() {
                table.push_row(&left_table.row(row))?;
            }
            self.ctx.check_cancellation()?;
            for row in 0..right_table.num_rows() {
                table.push_row(&right_table.row(row))?;
            }
        } else {
            // Sorted merge of the two inputs; ties take the left row first.
            let (mut i, mut j) = (0, 0);
            let key = |t: &IdTable, r: usize| -> Vec<corvus_core::Id> {
                sort_order.iter().map(|&c| t.at(r, c)).collect()
            };
            while i < left_table.num_rows() && j < right_table.num_rows() {
                if key(left_table, i) <= key(right_table, j) {
                    table.push_row(&left_table.row(i))?;
                    i += 1;
                } else {
                    table.push_row(&right_table.row(j))?;
                    j += 1;
                }
                if table.num_rows() % 4096 == 0 {
                    self.ctx.check_cancellation()?;
                }
            }
            while i < left_table.num_rows() {
                table.push_row(&left_table.row(i))?;
                i += 1;
            }
            while j < right_table.num_rows() {
                table.push_row(&right_table.row(j))?;
                j += 1;
            }
        }
        Ok(QueryResult::new(
            table,
            sort_order,
            LocalVocab::merged(left.local_vocab(), right.local_vocab()),
        ))
    }
}
