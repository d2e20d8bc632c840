//! Cap the number of distinct text records per entity combination.

use std::collections::{HashMap, HashSet};

use corvus_core::{Id, IdTable};

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Keeps, per entity combination, the `limit` best-scored distinct text
/// records. This bounds texts, not rows: every input row whose
/// `(entities, text)` combination is kept passes through, duplicates
/// included, in its original order.
pub struct TextLimit {
    ctx: SharedExecutionContext,
    child: SharedTree,
    limit: usize,
    text_record_column: ColumnIndex,
    entity_columns: Vec<ColumnIndex>,
    score_columns: Vec<ColumnIndex>,
}

impl TextLimit {
    pub fn new(
        ctx: SharedExecutionContext,
        child: SharedTree,
        limit: usize,
        text_record_column: ColumnIndex,
        entity_columns: Vec<ColumnIndex>,
        score_columns: Vec<ColumnIndex>,
    ) -> Self {
        Self {
            ctx,
            child,
            limit,
            text_record_column,
            entity_columns,
            score_columns,
        }
    }
}

impl Operation for TextLimit {
    fn execution_context(&self) -> &SharedExecutionContext {
        &self.ctx
    }

    fn descriptor(&self) -> String {
        format!("TextLimit with limit {}", self.limit)
    }

    fn cache_key_impl(&self) -> String {
        let entities: Vec<String> = self.entity_columns.iter().map(|c| c.to_string()).collect();
        let scores: Vec<String> = self.score_columns.iter().map(|c| c.to_string()).collect();
        format!(
            "TEXT_LIMIT {} text-column: {} entity-columns: [{}] score-columns: [{}]\n{}",
            self.limit,
            self.text_record_column,
            entities.join(" "),
            scores.join(" "),
            self.child.cache_key()
        )
    }

    fn result_width(&self) -> usize {
        self.child.result_width()
    }

    fn result_sorted_on(&self) -> Vec<ColumnIndex> {
        // Rows are only dropped, never reordered.
        self.child.result_sorted_on()
    }

    fn multiplicity(&self, column: ColumnIndex) -> f32 {
        self.child.multiplicity(column)
    }

    fn size_estimate(&self) -> usize {
        self.child.size_estimate()
    }

    fn cost_estimate(&self) -> usize {
        self.child.cost_estimate() + 2 * self.child.size_estimate()
    }

    fn variable_columns(&self) -> VariableColumnMap {
        self.child.variable_columns()
    }

    fn known_empty_result(&self) -> bool {
        self.limit == 0 || self.child.known_empty_result()
    }

    fn children(&self) -> Vec<&SharedTree> {
        vec![&self.child]
    }

    fn clone_operation(&self) -> Box<dyn Operation> {
        Box::new(TextLimit {
            ctx: self.ctx.clone(),
            child: self.child.deep_clone(),
            limit: self.limit,
            text_record_column: self.text_record_column,
            entity_columns: self.entity_columns.clone(),
            score_columns: self.score_columns.clone(),
        })
    }

    fn compute_result(&self) -> Result<QueryResult, QueryError> {
        let input = self.child.get_result(false)?;
        self.ctx.check_cancellation()?;
        let source = input.id_table();
        let mut table = IdTable::with_columns(source.num_columns(), self.ctx.allocator().clone());
        if self.limit == 0 {
            return Ok(QueryResult::new(
                table,
                self.result_sorted_on(),
                input.local_vocab().clone(),
            ));
        }

        let entities_of = |row: usize| -> Vec<Id> {
            self.entity_columns.iter().map(|&c| source.at(row, c)).collect()
        };
        let score_of = |row: usize| -> Vec<Id> {
            self.score_columns.iter().map(|&c| source.at(row, c)).collect()
        };

        // First pass: per entity combination, the distinct texts with the
        // score and position of their first occurrence.
        type TextInfo = (Id, Vec<Id>, usize);
        let mut groups: HashMap<Vec<Id>, Vec<TextInfo>> = HashMap::new();
        for row in 0..source.num_rows() {
            let text = source.at(row, self.text_record_column);
            let group = groups.entry(entities_of(row)).or_default();
            if !group.iter().any(|(t, _, _)| *t == text) {
                group.push((text, score_of(row), row));
            }
            if row % 4096 == 0 {
                self.ctx.check_cancellation()?;
            }
        }

        // Rank: score descending, ties by first occurrence.
        let kept: HashMap<Vec<Id>, HashSet<Id>> = groups
            .into_iter()
            .map(|(entities, mut texts)| {
                texts.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
                let keep: HashSet<Id> =
                    texts.into_iter().take(self.limit).map(|(t, _, _)| t).collect();
                (entities, keep)
            })
            .collect();

        // Second pass: forward every row whose text survived, in order.
        for row in 0..source.num_rows() {
            let text = source.at(row, self.text_record_column);
            if kept[&entities_of(row)].contains(&text) {
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
