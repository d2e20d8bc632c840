//! The value produced by every operator.

use std::sync::Arc;

use corvus_core::{IdTable, LocalVocab};

/// An operator result: the table, the columns it is sorted on, and the
/// vocabulary for ids synthesized while computing it.
#[derive(Debug)]
pub struct QueryResult {
    table: IdTable,
    sorted_by: Vec<usize>,
    local_vocab: LocalVocab,
}

/// Results are immutable once computed and shared between the cache and any
/// number of readers.
pub type SharedResult = Arc<QueryResult>;

impl QueryResult {
    /// Bundle a computed table. The table must actually be sorted on
    /// `sorted_by`; operators uphold this by construction.
    pub fn new(table: IdTable, sorted_by: Vec<usize>, local_vocab: LocalVocab) -> Self {
        debug_assert!(
            table.is_sorted_by(&sorted_by),
            "result table is not sorted on its declared sort columns"
        );
        Self {
            table,
            sorted_by,
            local_vocab,
        }
    }

    pub fn id_table(&self) -> &IdTable {
        &self.table
    }

    pub fn sorted_by(&self) -> &[usize] {
        &self.sorted_by
    }

    pub fn local_vocab(&self) -> &LocalVocab {
        &self.local_vocab
    }

    /// Approximate memory footprint, used for cache accounting.
    pub fn size_bytes(&self) -> usize {
        let table = self.table.num_rows() * self.table.num_columns() * std::mem::size_of::<corvus_core::Id>();
        // Local vocab entries are few and short; a flat per-word estimate is
        // good enough for eviction decisions.
        table + self.local_vocab.len() * 64
    }
}
