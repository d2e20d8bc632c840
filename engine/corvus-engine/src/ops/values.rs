//! Inline bindings (the VALUES clause), also the table injection point for
//! tests.

use corvus_core::{Id, IdTable, LocalVocab};

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, Variable, VariableColumnMap};

pub struct Values {
    ctx: SharedExecutionContext,
    variables: Vec<Variable>,
    rows: Vec<Vec<Id>>,
    local_vocab: LocalVocab,
}

impl Values {
    pub fn new(ctx: SharedExecutionContext, variables: Vec<Variable>, rows: Vec<Vec<Id>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == variables.len()));
        Self {
            ctx,
            variables,
            rows,
            local_vocab: LocalVocab::new(),
        }
    }

    /// Values whose rows reference entries of `local_vocab`.
    pub fn with_local_vocab(
        ctx: SharedExecutionContext,
        variables: Vec<Variable>,
        rows: Vec<Vec<Id>>,
        local_vocab: LocalVocab,
    ) -> Self {
        Self {
            ctx,
            variables,
            rows,
            local_vocab,
        }
    }
}

impl Operation for Values {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        format!(
            "Values with {} rows of {} columns",
            self.rows.len(),
            self.variables.len()
        )
    }

    fn cache_key_impl(&self) -> String {
        let mut key = format!("VALUES width {}\n", self.variables.len());
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|id| id.to_string()).collect();
            key.push_str(&cells.join(" "));
            key.push('\n');
        }
        key
    }

    fn result_width(&self) -> usize {
        self.variables.len()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        Vec::new()
    }

    fn multiplicity(&self, _column: ColumnIndex) -> f32 {
        1.0
    }

    fn size_estimate(&self) -> usize {
        self.rows.len().max(1)
    }

    fn cost_estimate(&self) -> usize {
        self.rows.len()
    }

    fn variable_columns(&self) -> VariableColumnMap {
        self.variables
            .iter()
            .cloned()
            .enumerate()
            .map(|(c, var)| (var, c))
            .collect()
    }

    fn known_empty_result(&self) -> bool {
        self.rows.is_empty()
    }

    fn children(&self) -> Vec<&SharedTree> {
        Vec::new()
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(Values {
            ctx: self.ctx.clone(),
            variables: self.variables.clone(),
            rows: self.rows.clone(),
            local_vocab: self.local_vocab.clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        let mut table = IdTable::with_columns(self.result_width(), self.ctx.allocator().clone());
        for row in &self.rows {
            table.push_row(row)?;
        }
        Ok(QueryResult::new(
            table,
            Vec::new(),
            self.local_vocab.clone(),
        ))
    }
}
