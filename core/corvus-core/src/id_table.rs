//! Column-major tables of [`Id`]s.
//!
//! An [`IdTable`] owns its columns; the number of columns is fixed once the
//! first row is added, rows grow. Join kernels and operators mostly work on
//! [`IdTableView`]s: borrowed column subsets or permutations that re-label
//! columns without copying any data. Growth is accounted against the
//! table's [`TrackedAllocator`], so a query that produces more intermediate
//! rows than its budget allows fails with an allocation error instead of
//! taking the process down.

use std::cmp::Ordering;

use crate::alloc::{AllocationError, TrackedAllocator};
use crate::id::Id;

const ID_SIZE: usize = std::mem::size_of::<Id>();
const MIN_CAPACITY: usize = 8;

/// A growable, column-major table of ids.
#[derive(Debug)]
pub struct IdTable {
    columns: Vec<Vec<Id>>,
    num_rows: usize,
    allocator: TrackedAllocator,
    reserved_bytes: usize,
}

impl IdTable {
    /// An empty table with zero columns.
    pub fn new(allocator: TrackedAllocator) -> Self {
        Self {
            columns: Vec::new(),
            num_rows: 0,
            allocator,
            reserved_bytes: 0,
        }
    }

    /// An empty table with `num_columns` columns.
    pub fn with_columns(num_columns: usize, allocator: TrackedAllocator) -> Self {
        let mut table = Self::new(allocator);
        table.set_num_columns(num_columns);
        table
    }

    /// Build a table from row slices. Test and planner convenience.
    pub fn from_rows(rows: &[&[Id]], allocator: TrackedAllocator) -> Result<Self, AllocationError> {
        let width = rows.first().map_or(0, |r| r.len());
        let mut table = Self::with_columns(width, allocator);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Fix the column count. Only legal while the table has no rows.
    pub fn set_num_columns(&mut self, num_columns: usize) {
        assert_eq!(
            self.num_rows, 0,
            "column count can only change on an empty table"
        );
        self.columns.resize_with(num_columns, Vec::new);
        self.columns.truncate(num_columns);
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn allocator(&self) -> &TrackedAllocator {
        &self.allocator
    }

    /// Append one row. Reserves budget ahead of any growth so that a failed
    /// reservation leaves the table unchanged.
    pub fn push_row(&mut self, row: &[Id]) -> Result<(), AllocationError> {
        assert_eq!(row.len(), self.num_columns(), "row width mismatch");
        let mut additional = 0usize;
        for column in &self.columns {
            if column.len() == column.capacity() {
                let grown = (column.capacity() * 2).max(MIN_CAPACITY);
                additional += (grown - column.capacity()) * ID_SIZE;
            }
        }
        if additional > 0 {
            self.allocator.try_reserve(additional)?;
            self.reserved_bytes += additional;
            for column in &mut self.columns {
                if column.len() == column.capacity() {
                    let grown = (column.capacity() * 2).max(MIN_CAPACITY);
                    column.reserve_exact(grown - column.len());
                }
            }
        }
        for (column, id) in self.columns.iter_mut().zip(row) {
            column.push(*id);
        }
        self.num_rows += 1;
        Ok(())
    }

    /// The cell at `(row, column)`.
    pub fn at(&self, row: usize, column: usize) -> Id {
        self.columns[column][row]
    }

    /// A whole column as a slice. Cheap, this is the native layout.
    pub fn column(&self, column: usize) -> &[Id] {
        &self.columns[column]
    }

    /// Copy of one row, in column order.
    pub fn row(&self, row: usize) -> Vec<Id> {
        self.columns.iter().map(|column| column[row]).collect()
    }

    /// Borrowed view that exposes only `columns`, re-labeled `0..n`.
    pub fn as_column_subset_view<'a>(&'a self, columns: &[usize]) -> IdTableView<'a> {
        for &c in columns {
            assert!(c < self.num_columns(), "view column {c} out of range");
        }
        IdTableView {
            table: self,
            columns: columns.to_vec(),
        }
    }

    /// View over all columns in their current order.
    pub fn as_view(&self) -> IdTableView<'_> {
        IdTableView {
            table: self,
            columns: (0..self.num_columns()).collect(),
        }
    }

    /// Permute or subset the owned columns in place. `columns` must contain
    /// distinct in-range indices; dropped columns return their bytes to the
    /// budget.
    pub fn set_column_subset(&mut self, columns: &[usize]) {
        let mut seen = vec![false; self.num_columns()];
        for &c in columns {
            assert!(c < self.num_columns(), "subset column {c} out of range");
            assert!(!seen[c], "duplicate column {c} in subset");
            seen[c] = true;
        }
        let mut old = std::mem::take(&mut self.columns);
        self.columns = columns
            .iter()
            .map(|&c| std::mem::take(&mut old[c]))
            .collect();
        drop(old);
        self.sync_reservation();
    }

    /// Reorder rows by `permutation` (a bijection on `0..num_rows`).
    pub fn apply_row_permutation(&mut self, permutation: &[usize]) {
        assert_eq!(permutation.len(), self.num_rows, "permutation length");
        for column in &mut self.columns {
            let reordered: Vec<Id> = permutation.iter().map(|&r| column[r]).collect();
            *column = reordered;
        }
        self.sync_reservation();
    }

    /// Stable sort of the rows by the given columns, lexicographically.
    pub fn sort_by_columns(&mut self, columns: &[usize]) {
        let mut permutation: Vec<usize> = (0..self.num_rows).collect();
        permutation.sort_by(|&a, &b| self.cmp_rows_on(a, b, columns));
        self.apply_row_permutation(&permutation);
    }

    /// Lexicographic comparison of two rows on `columns`.
    pub fn cmp_rows_on(&self, a: usize, b: usize, columns: &[usize]) -> Ordering {
        for &c in columns {
            let ord = self.columns[c][a].cmp(&self.columns[c][b]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// True iff the rows are lexicographically non-decreasing on `columns`.
    pub fn is_sorted_by(&self, columns: &[usize]) -> bool {
        (1..self.num_rows).all(|r| self.cmp_rows_on(r - 1, r, columns) != Ordering::Greater)
    }

    /// Deep copy under the same budget.
    pub fn try_clone(&self) -> Result<Self, AllocationError> {
        let bytes: usize = self.columns.iter().map(|c| c.capacity() * ID_SIZE).sum();
        self.allocator.try_reserve(bytes)?;
        Ok(Self {
            columns: self.columns.clone(),
            num_rows: self.num_rows,
            allocator: self.allocator.clone(),
            reserved_bytes: bytes,
        })
    }

    fn sync_reservation(&mut self) {
        let actual: usize = self.columns.iter().map(|c| c.capacity() * ID_SIZE).sum();
        if actual < self.reserved_bytes {
            self.allocator.release(self.reserved_bytes - actual);
        }
        // Growth paths reserve up front, so `actual` never exceeds the
        // reservation here.
        self.reserved_bytes = actual;
    }
}

impl Drop for IdTable {
    fn drop(&mut self) {
        self.allocator.release(self.reserved_bytes);
    }
}

impl PartialEq for IdTable {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

/// Borrowed, re-labeled column subset of an [`IdTable`].
///
/// The underlying table must outlive the view; the borrow checker enforces
/// exactly that.
#[derive(Debug, Clone)]
pub struct IdTableView<'a> {
    table: &'a IdTable,
    columns: Vec<usize>,
}

impl<'a> IdTableView<'a> {
    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// The cell at `(row, column)` in view coordinates.
    pub fn at(&self, row: usize, column: usize) -> Id {
        self.table.at(row, self.columns[column])
    }

    /// A whole view column as a slice of the underlying storage.
    pub fn column(&self, column: usize) -> &'a [Id] {
        self.table.column(self.columns[column])
    }

    /// Copy of one row in view column order.
    pub fn row(&self, row: usize) -> Vec<Id> {
        self.columns.iter().map(|&c| self.table.at(row, c)).collect()
    }

    /// Lexicographic comparison of two rows across all view columns.
    pub fn cmp_rows(&self, a: usize, b: usize) -> Ordering {
        for &c in &self.columns {
            let ord = self.table.at(a, c).cmp(&self.table.at(b, c));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Lexicographic comparison of row `a` of this view with row `b` of
    /// `other`. Both views must have the same width.
    pub fn cmp_rows_with(&self, a: usize, other: &IdTableView<'_>, b: usize) -> Ordering {
        debug_assert_eq!(self.num_columns(), other.num_columns());
        for c in 0..self.num_columns() {
            let ord = self.at(a, c).cmp(&other.at(b, c));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// True iff any cell in the view is UNDEF.
    pub fn contains_undef(&self) -> bool {
        self.columns
            .iter()
            .any(|&c| self.table.column(c).iter().any(|id| id.is_undefined()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Id> {
        values.iter().map(|&v| Id::from_int(v)).collect()
    }

    #[test]
    fn push_and_read_back() {
        let mut table = IdTable::with_columns(2, TrackedAllocator::unlimited());
        table.push_row(&ints(&[1, 2])).unwrap();
        table.push_row(&ints(&[3, 4])).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.at(1, 0), Id::from_int(3));
        assert_eq!(table.column(1), &ints(&[2, 4])[..]);
    }

    #[test]
    fn growth_respects_the_budget() {
        let allocator = TrackedAllocator::with_limit(256);
        let mut table = IdTable::with_columns(4, allocator);
        let mut failed = false;
        for i in 0..1000 {
            if table.push_row(&ints(&[i, i, i, i])).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "a 256 byte budget cannot hold 1000 rows of 4 columns");
    }

    #[test]
    fn drop_releases_the_reservation() {
        let allocator = TrackedAllocator::with_limit(1 << 20);
        {
            let mut table = IdTable::with_columns(3, allocator.clone());
            for i in 0..100 {
                table.push_row(&ints(&[i, i, i])).unwrap();
            }
            assert!(allocator.used() > 0);
        }
        assert_eq!(allocator.used(), 0);
    }

    #[test]
    fn column_subset_view_relabels() {
        let mut table = IdTable::with_columns(3, TrackedAllocator::unlimited());
        table.push_row(&ints(&[10, 20, 30])).unwrap();
        let view = table.as_column_subset_view(&[2, 0]);
        assert_eq!(view.num_columns(), 2);
        assert_eq!(view.at(0, 0), Id::from_int(30));
        assert_eq!(view.at(0, 1), Id::from_int(10));
    }

    #[test]
    fn set_column_subset_permutes_ownership() {
        let mut table = IdTable::with_columns(3, TrackedAllocator::unlimited());
        table.push_row(&ints(&[1, 2, 3])).unwrap();
        table.set_column_subset(&[1, 2, 0]);
        assert_eq!(table.row(0), ints(&[2, 3, 1]));
        assert_eq!(table.num_columns(), 3);
    }

    #[test]
    fn sort_is_stable_and_lexicographic() {
        let mut table = IdTable::with_columns(3, TrackedAllocator::unlimited());
        // Third column tags the input order to observe stability.
        table.push_row(&ints(&[2, 1, 0])).unwrap();
        table.push_row(&ints(&[1, 9, 1])).unwrap();
        table.push_row(&ints(&[2, 0, 2])).unwrap();
        table.push_row(&ints(&[1, 9, 3])).unwrap();
        table.sort_by_columns(&[0, 1]);
        assert_eq!(table.column(2), &ints(&[1, 3, 2, 0])[..]);
        assert!(table.is_sorted_by(&[0, 1]));
    }

    #[test]
    fn random_tables_sort_correctly() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut table = IdTable::with_columns(2, TrackedAllocator::unlimited());
        for _ in 0..500 {
            let row = [
                Id::from_int(rng.gen_range(-20..20)),
                Id::from_int(rng.gen_range(-20..20)),
            ];
            table.push_row(&row).unwrap();
        }
        table.sort_by_columns(&[0, 1]);
        assert!(table.is_sorted_by(&[0, 1]));
        assert_eq!(table.num_rows(), 500);
    }

    #[test]
    fn undef_sorts_first() {
        let mut table = IdTable::with_columns(1, TrackedAllocator::unlimited());
        table.push_row(&[Id::from_int(1)]).unwrap();
        table.push_row(&[Id::UNDEF]).unwrap();
        table.push_row(&[Id::from_int(-1)]).unwrap();
        table.sort_by_columns(&[0]);
        assert_eq!(table.at(0, 0), Id::UNDEF);
    }
}
