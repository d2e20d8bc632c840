//! Permutation scans: the leaves of every plan.

use corvus_core::{Id, LocalVocab};

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::index::Permutation;
use crate::operation::Operation;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, Variable, VariableColumnMap};

/// A triple-pattern lookup against one permutation of the external index.
/// The index returns the non-fixed positions in permutation order, already
/// sorted.
pub struct Scan {
    ctx: SharedExecutionContext,
    permutation: Permutation,
    fixed_prefix: Vec<Id>,
    free_variables: Vec<Variable>,
}

impl Scan {
    pub fn new(
        ctx: SharedExecutionContext,
        permutation: Permutation,
        fixed_prefix: Vec<Id>,
        free_variables: Vec<Variable>,
    ) -> Self {
        assert_eq!(
            fixed_prefix.len() + free_variables.len(),
            3,
            "a triple scan fixes a prefix and binds the rest"
        );
        Self {
            ctx,
            permutation,
            fixed_prefix,
            free_variables,
        }
    }
}

impl Operation for Scan {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        format!(
            "Scan {} with {} fixed",
            self.permutation.name(),
            self.fixed_prefix.len()
        )
    }

    fn cache_key_impl(&self) -> String {
        let prefix: Vec<String> = self.fixed_prefix.iter().map(|id| id.to_string()).collect();
        format!(
            "SCAN {} prefix: [{}]",
            self.permutation.name(),
            prefix.join(" ")
        )
    }

    fn result_width(&self) -> usize {
        self.free_variables.len()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        (0..self.result_width()).collect()
    }

    fn multiplicity(&self, _column: ColumnIndex) -> f32 {
        // Without per-column index statistics every scan column is assumed
        // to be nearly distinct.
        1.0
    }

    fn size_estimate(&self) -> usize {
        // Each fixed position cuts the candidate set by a flat factor.
        let total = self.ctx.index().num_triples();
        (total >> (2 * self.fixed_prefix.len() as u32)).max(1)
    }

    fn cost_estimate(&self) -> usize {
        self.size_estimate()
    }

    fn variable_columns(&self) -> VariableColumnMap {
        self.free_variables
            .iter()
            .cloned()
            .enumerate()
            .map(|(c, var)| (var, c))
            .collect()
    }

    fn children(&self) -> Vec<&SharedTree> {
        Vec::new()
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(Scan {
            ctx: self.ctx.clone(),
            permutation: self.permutation,
            fixed_prefix: self.fixed_prefix.clone(),
            free_variables: self.free_variables.clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        let table =
            self.ctx
                .index()
                .scan(self.permutation, &self.fixed_prefix, self.ctx.allocator())?;
        self.ctx.check_cancellation()?;
        let sorted_on = self.result_sorted_on();
        debug_assert!(table.is_sorted_by(&sorted_on), "index scan must be sorted");
        Ok(QueryResult::new(table, sorted_on, LocalVocab::new()))
    }
}
