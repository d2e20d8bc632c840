//! The narrow interface to the external index.
//!
//! The execution core never touches the on-disk index directly; it only
//! asks for permutation scans, which yield sorted id tables. Anything
//! else about storage (vocabularies, compression, delta triples) stays on
//! the other side of this trait.

use corvus_core::{Id, IdTable, TrackedAllocator};
use serde::Serialize;

use crate::error::QueryError;

/// The six sort orders of the triple store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Permutation {
    Spo,
    Sop,
    Pso,
    Pos,
    Osp,
    Ops,
}

impl Permutation {
    /// Positions of (subject, predicate, object) in this permutation's
    /// column order.
    pub fn column_order(self) -> [usize; 3] {
        match self {
            Permutation::Spo => [0, 1, 2],
            Permutation::Sop => [0, 2, 1],
            Permutation::Pso => [1, 0, 2],
            Permutation::Pos => [1, 2, 0],
            Permutation::Osp => [2, 0, 1],
            Permutation::Ops => [2, 1, 0],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Permutation::Spo => "SPO",
            Permutation::Sop => "SOP",
            Permutation::Pso => "PSO",
            Permutation::Pos => "POS",
            Permutation::Osp => "OSP",
            Permutation::Ops => "OPS",
        }
    }
}

/// Scan access to the triple store.
///
/// `scan` returns the non-fixed positions of `(subject, predicate, object)`
/// in permutation order, sorted lexicographically; `fixed_prefix` fixes the
/// leading positions of the permutation.
pub trait PermutationScanner: Send + Sync {
    fn scan(
        &self,
        permutation: Permutation,
        fixed_prefix: &[Id],
        allocator: &TrackedAllocator,
    ) -> Result<IdTable, QueryError>;

    /// Total triple count, for size estimates.
    fn num_triples(&self) -> usize;
}

/// In-memory scanner backing tests and small datasets.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    triples: Vec<[Id; 3]>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subject: Id, predicate: Id, object: Id) {
        self.triples.push([subject, predicate, object]);
    }
}

impl PermutationScanner for MemoryIndex {
    fn scan(
        &self,
        permutation: Permutation,
        fixed_prefix: &[Id],
        allocator: &TrackedAllocator,
    ) -> Result<IdTable, QueryError> {
        if fixed_prefix.len() > 3 {
            return Err(QueryError::Index(format!(
                "scan prefix of length {} on a triple permutation",
                fixed_prefix.len()
            )));
        }
        let order = permutation.column_order();
        let width = 3 - fixed_prefix.len();
        let mut rows: Vec<Vec<Id>> = self
            .triples
            .iter()
            .map(|triple| order.map(|position| triple[position]).to_vec())
            .filter(|permuted| permuted.iter().zip(fixed_prefix).all(|(a, b)| a == b))
            .map(|permuted| permuted[fixed_prefix.len()..].to_vec())
            .collect();
        rows.sort();
        rows.dedup();
        let mut table = IdTable::with_columns(width, allocator.clone());
        for row in &rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    fn num_triples(&self) -> usize {
        self.triples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(i: u64) -> Id {
        Id::from_vocab_index(i)
    }

    #[test]
    fn scan_projects_and_sorts() {
        let mut index = MemoryIndex::new();
        index.insert(vocab(2), vocab(10), vocab(5));
        index.insert(vocab(1), vocab(10), vocab(6));
        index.insert(vocab(1), vocab(11), vocab(7));

        // All triples in POS order, predicate fixed to 10.
        let table = index
            .scan(Permutation::Pos, &[vocab(10)], &TrackedAllocator::unlimited())
            .unwrap();
        assert_eq!(table.num_columns(), 2);
        assert_eq!(table.num_rows(), 2);
        // Sorted by object, then subject.
        assert_eq!(table.row(0), vec![vocab(5), vocab(2)]);
        assert_eq!(table.row(1), vec![vocab(6), vocab(1)]);
    }

    #[test]
    fn full_scan_has_three_columns() {
        let mut index = MemoryIndex::new();
        index.insert(vocab(1), vocab(2), vocab(3));
        let table = index
            .scan(Permutation::Spo, &[], &TrackedAllocator::unlimited())
            .unwrap();
        assert_eq!(table.num_columns(), 3);
        assert!(table.is_sorted_by(&[0, 1, 2]));
    }
}
