//! Sorted-merge join kernels with UNDEF-aware semantics.
//!
//! The zipper join walks two inputs that are sorted lexicographically on
//! their join columns. Without UNDEF values this is the textbook two-pointer
//! merge where equal key blocks produce their Cartesian product. With UNDEF
//! in play, an UNDEF join cell matches every partner value, so a row must
//! additionally be matched against rows on the opposite side that sort
//! *below* it but unify with it once UNDEFs are filled in. Those rows are
//! enumerated by the "smaller undef range" probes; every emission that
//! breaks the output order is counted so the caller knows whether a
//! post-sort is required.
//!
//! Output columns are the join columns first, then the remaining left, then
//! the remaining right columns; [`JoinColumnMapping`] records the
//! permutations between that layout and the one the parent operator
//! expects.

use std::cmp::Ordering;

use corvus_core::{Id, IdTable, IdTableView};

use crate::error::QueryError;
use crate::variable::ColumnIndex;

/// Rows between cancellation probes in the merge loops.
const CHECK_INTERVAL: usize = 1024;

/// Column bookkeeping for a join of `left_width` x `right_width` tables on
/// `join_columns` pairs.
#[derive(Debug, Clone)]
pub struct JoinColumnMapping {
    join_columns_left: Vec<ColumnIndex>,
    join_columns_right: Vec<ColumnIndex>,
    permutation_left: Vec<ColumnIndex>,
    permutation_right: Vec<ColumnIndex>,
    permutation_result: Vec<ColumnIndex>,
}

impl JoinColumnMapping {
    pub fn new(
        join_columns: &[(ColumnIndex, ColumnIndex)],
        left_width: usize,
        right_width: usize,
    ) -> Self {
        let join_columns_left: Vec<_> = join_columns.iter().map(|&(l, _)| l).collect();
        let join_columns_right: Vec<_> = join_columns.iter().map(|&(_, r)| r).collect();

        // Join columns first, the remaining columns keep their order.
        let mut permutation_left = join_columns_left.clone();
        permutation_left.extend((0..left_width).filter(|c| !join_columns_left.contains(c)));
        let mut permutation_right = join_columns_right.clone();
        permutation_right.extend((0..right_width).filter(|c| !join_columns_right.contains(c)));

        // The kernel produces [join, left rest, right rest]; the parent
        // expects [left columns in original order, right rest]. For every
        // output position, record where it lives in the kernel layout.
        let num_join = join_columns.len();
        let mut permutation_result = Vec::with_capacity(left_width + right_width - num_join);
        for c in 0..left_width {
            let kernel_pos = permutation_left
                .iter()
                .position(|&p| p == c)
                .expect("left column present in permutation");
            permutation_result.push(kernel_pos);
        }
        let mut right_rest_pos = left_width;
        for c in 0..right_width {
            if !join_columns_right.contains(&c) {
                permutation_result.push(right_rest_pos);
                right_rest_pos += 1;
            }
        }
        Self {
            join_columns_left,
            join_columns_right,
            permutation_left,
            permutation_right,
            permutation_result,
        }
    }

    pub fn jcs_left(&self) -> &[ColumnIndex] {
        &self.join_columns_left
    }

    pub fn jcs_right(&self) -> &[ColumnIndex] {
        &self.join_columns_right
    }

    /// All left columns with the join columns moved to the front.
    pub fn permutation_left(&self) -> &[ColumnIndex] {
        &self.permutation_left
    }

    pub fn permutation_right(&self) -> &[ColumnIndex] {
        &self.permutation_right
    }

    /// Maps the kernel's output layout back to the expected one; apply via
    /// `IdTable::set_column_subset`.
    pub fn permutation_result(&self) -> &[ColumnIndex] {
        &self.permutation_result
    }
}

/// Materializes combined rows into the result table.
///
/// Expects both inputs as views permuted so the join columns come first.
/// A combined row takes the join columns (left value unless it is UNDEF),
/// then the remaining left columns, then the remaining right columns.
pub struct RowAdder<'a> {
    left: IdTableView<'a>,
    right: IdTableView<'a>,
    num_join_columns: usize,
    table: IdTable,
    scratch: Vec<Id>,
}

impl<'a> RowAdder<'a> {
    pub fn new(
        num_join_columns: usize,
        left: IdTableView<'a>,
        right: IdTableView<'a>,
        table: IdTable,
    ) -> Self {
        let width = left.num_columns() + right.num_columns() - num_join_columns;
        assert_eq!(table.num_columns(), width, "result table width mismatch");
        Self {
            left,
            right,
            num_join_columns,
            table,
            scratch: Vec::with_capacity(width),
        }
    }

    /// Emit the combination of `left_row` and `right_row`.
    pub fn add_row(&mut self, left_row: usize, right_row: usize) -> Result<(), QueryError> {
        self.scratch.clear();
        for c in 0..self.num_join_columns {
            let left_value = self.left.at(left_row, c);
            let value = if left_value.is_undefined() {
                self.right.at(right_row, c)
            } else {
                left_value
            };
            self.scratch.push(value);
        }
        for c in self.num_join_columns..self.left.num_columns() {
            self.scratch.push(self.left.at(left_row, c));
        }
        for c in self.num_join_columns..self.right.num_columns() {
            self.scratch.push(self.right.at(right_row, c));
        }
        self.table.push_row(&self.scratch)?;
        Ok(())
    }

    /// Emit `left_row` padded with UNDEF on the right side (OPTIONAL with
    /// no match).
    pub fn add_optional_row(&mut self, left_row: usize) -> Result<(), QueryError> {
        self.scratch.clear();
        for c in 0..self.left.num_columns() {
            self.scratch.push(self.left.at(left_row, c));
        }
        for _ in self.num_join_columns..self.right.num_columns() {
            self.scratch.push(Id::UNDEF);
        }
        self.table.push_row(&self.scratch)?;
        Ok(())
    }

    pub fn into_table(self) -> IdTable {
        self.table
    }
}

fn cmp_row_to_key(view: &IdTableView<'_>, row: usize, key: &[Id]) -> Ordering {
    for (c, key_id) in key.iter().enumerate() {
        let ord = view.at(row, c).cmp(key_id);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn lower_bound(view: &IdTableView<'_>, key: &[Id]) -> usize {
    // Sorted input, so the partition point of "strictly smaller" is the
    // first candidate row.
    let mut low = 0;
    let mut high = view.num_rows();
    while low < high {
        let mid = (low + high) / 2;
        if cmp_row_to_key(view, mid, key) == Ordering::Less {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

fn equal_range(view: &IdTableView<'_>, key: &[Id]) -> std::ops::Range<usize> {
    let start = lower_bound(view, key);
    let mut end = start;
    while end < view.num_rows() && cmp_row_to_key(view, end, key) == Ordering::Equal {
        end += 1;
    }
    start..end
}

fn rows_compatible(a: &[Id], b: &[Id]) -> bool {
    a.iter()
        .zip(b)
        .all(|(x, y)| x == y || x.is_undefined() || y.is_undefined())
}

/// Find all rows of `side` that sort strictly below `key` but unify with it
/// once UNDEFs are filled in. This is the "smaller undef range" probe of
/// the generalized merge.
///
/// For a fully defined key the compatible smaller rows are exactly the rows
/// equal to some copy of the key with a non-empty subset of columns
/// replaced by UNDEF; each such pattern is one binary-searched range. A key
/// that itself contains UNDEF can match rows that are not exact patterns,
/// so that case falls back to a scan of the strictly-smaller prefix.
pub fn find_smaller_undef_ranges(key: &[Id], side: &IdTableView<'_>, out: &mut Vec<usize>) {
    out.clear();
    let num_cols = key.len();
    // A key with UNDEFs matches arbitrary values in those columns, which
    // no finite pattern set covers; keys wider than the mask enumeration
    // can afford take the same route.
    if num_cols >= 16 || key.iter().any(|id| id.is_undefined()) {
        let first_candidate = lower_bound(side, key);
        for row in 0..first_candidate {
            if rows_compatible(&side.row(row), key) {
                out.push(row);
            }
        }
        return;
    }
    let mut pattern = vec![Id::UNDEF; num_cols];
    for mask in 1u32..(1 << num_cols) {
        for (c, value) in key.iter().enumerate() {
            pattern[c] = if mask & (1 << c) != 0 {
                Id::UNDEF
            } else {
                *value
            };
        }
        out.extend(equal_range(side, &pattern));
    }
    out.sort_unstable();
}

/// Options of one zipper run.
pub struct ZipperConfig {
    /// Run the generalized UNDEF-aware merge instead of the cheap one.
    pub undef_aware: bool,
    /// Record which left rows found at least one match (OPTIONAL, MINUS).
    pub track_left_matches: bool,
}

/// Output bookkeeping of a zipper run.
pub struct ZipperOutcome {
    /// Emissions whose combined key was smaller than a previous emission's.
    /// Nonzero only in the UNDEF-aware case; the caller must re-sort then.
    pub num_out_of_order: usize,
    /// Per left row: did it match? Empty unless tracking was requested.
    pub matched_left: Vec<bool>,
}

/// The sorted-merge join over two views of join columns.
///
/// `left` and `right` expose exactly the join columns, sorted
/// lexicographically. Every match is reported as `add_row(left, right)`;
/// the cancellation probe runs every [`CHECK_INTERVAL`] operations.
pub fn zipper_join_with_undef(
    left: &IdTableView<'_>,
    right: &IdTableView<'_>,
    config: ZipperConfig,
    add_row: &mut dyn FnMut(usize, usize) -> Result<(), QueryError>,
    check_cancellation: &dyn Fn() -> Result<(), QueryError>,
) -> Result<ZipperOutcome, QueryError> {
    let mut outcome = ZipperOutcome {
        num_out_of_order: 0,
        matched_left: if config.track_left_matches {
            vec![false; left.num_rows()]
        } else {
            Vec::new()
        },
    };
    if left.is_empty() || right.is_empty() {
        return Ok(outcome);
    }

    let num_cols = left.num_columns();
    debug_assert_eq!(num_cols, right.num_columns(), "join column count mismatch");

    let mut previous_key: Option<Vec<Id>> = None;
    let mut operations = 0usize;
    let mut probe_hits = Vec::new();

    let combined_key = |left_row: usize, right_row: usize| -> Vec<Id> {
        (0..num_cols)
            .map(|c| {
                let l = left.at(left_row, c);
                if l.is_undefined() {
                    right.at(right_row, c)
                } else {
                    l
                }
            })
            .collect()
    };

    macro_rules! emit {
        ($i:expr, $j:expr) => {{
            // The cheap merge emits in order by construction; only the
            // UNDEF-aware walk needs to watch for inversions.
            if config.undef_aware {
                let key = combined_key($i, $j);
                if previous_key.as_ref().is_some_and(|prev| *prev > key) {
                    outcome.num_out_of_order += 1;
                }
                previous_key = Some(key);
            }
            if config.track_left_matches {
                outcome.matched_left[$i] = true;
            }
            add_row($i, $j)?;
            operations += 1;
            if operations % CHECK_INTERVAL == 0 {
                check_cancellation()?;
            }
        }};
    }

    // Match `row` of one side against the compatible rows of the other side
    // that sort strictly below it.
    macro_rules! probe_smaller {
        (left_of_right, $j:expr) => {{
            if config.undef_aware {
                find_smaller_undef_ranges(&right.row($j), left, &mut probe_hits);
                let hits = std::mem::take(&mut probe_hits);
                for &i in &hits {
                    emit!(i, $j);
                }
                probe_hits = hits;
            }
        }};
        (right_of_left, $i:expr) => {{
            if config.undef_aware {
                find_smaller_undef_ranges(&left.row($i), right, &mut probe_hits);
                let hits = std::mem::take(&mut probe_hits);
                for &j in &hits {
                    emit!($i, j);
                }
                probe_hits = hits;
            }
        }};
    }

    let mut i = 0;
    let mut j = 0;
    while i < left.num_rows() && j < right.num_rows() {
        operations += 1;
        if operations % CHECK_INTERVAL == 0 {
            check_cancellation()?;
        }
        match left.cmp_rows_with(i, right, j) {
            Ordering::Less => {
                probe_smaller!(right_of_left, i);
                i += 1;
            }
            Ordering::Greater => {
                probe_smaller!(left_of_right, j);
                j += 1;
            }
            Ordering::Equal => {
                let block_end_left = {
                    let mut end = i + 1;
                    while end < left.num_rows() && left.cmp_rows(i, end) == Ordering::Equal {
                        end += 1;
                    }
                    end
                };
                let block_end_right = {
                    let mut end = j + 1;
                    while end < right.num_rows() && right.cmp_rows(j, end) == Ordering::Equal {
                        end += 1;
                    }
                    end
                };
                // Rows below the block that unify with it.
                for a in i..block_end_left {
                    probe_smaller!(right_of_left, a);
                }
                for b in j..block_end_right {
                    probe_smaller!(left_of_right, b);
                }
                // The Cartesian product of the equal blocks.
                for a in i..block_end_left {
                    for b in j..block_end_right {
                        emit!(a, b);
                    }
                }
                i = block_end_left;
                j = block_end_right;
            }
        }
    }
    // Rows that outlived the merge still need their backward probes.
    while i < left.num_rows() {
        probe_smaller!(right_of_left, i);
        i += 1;
    }
    while j < right.num_rows() {
        probe_smaller!(left_of_right, j);
        j += 1;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvus_core::TrackedAllocator;

    fn table(rows: &[&[i64]]) -> IdTable {
        let width = rows.first().map_or(0, |r| r.len());
        let mut t = IdTable::with_columns(width, TrackedAllocator::unlimited());
        for row in rows {
            let ids: Vec<Id> = row
                .iter()
                .map(|&v| if v < 0 { Id::UNDEF } else { Id::from_int(v) })
                .collect();
            t.push_row(&ids).unwrap();
        }
        t
    }

    fn run_join(left: &IdTable, right: &IdTable, undef_aware: bool) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        let left_view = left.as_view();
        let right_view = right.as_view();
        zipper_join_with_undef(
            &left_view,
            &right_view,
            ZipperConfig {
                undef_aware,
                track_left_matches: false,
            },
            &mut |i, j| {
                pairs.push((i, j));
                Ok(())
            },
            &|| Ok(()),
        )
        .unwrap();
        pairs
    }

    #[test]
    fn cheap_merge_matches_equal_keys() {
        let left = table(&[&[1], &[2], &[4]]);
        let right = table(&[&[2], &[3], &[4]]);
        assert_eq!(run_join(&left, &right, false), vec![(1, 0), (2, 2)]);
    }

    #[test]
    fn equal_blocks_produce_cartesian_products() {
        let left = table(&[&[5], &[5]]);
        let right = table(&[&[5], &[5], &[5]]);
        assert_eq!(run_join(&left, &right, false).len(), 6);
    }

    #[test]
    fn empty_side_short_circuits() {
        let left = table(&[&[1]]);
        let empty = IdTable::with_columns(1, TrackedAllocator::unlimited());
        assert!(run_join(&left, &empty, true).is_empty());
        assert!(run_join(&empty, &left, true).is_empty());
    }

    #[test]
    fn undef_on_the_left_matches_every_partner() {
        // -1 encodes UNDEF in the helper.
        let left = table(&[&[-1], &[2]]);
        let right = table(&[&[1], &[2]]);
        let pairs = run_join(&left, &right, true);
        // (U, 1), (U, 2) from the undef row plus the direct (2, 2) match.
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&(0, 0)));
        assert!(pairs.contains(&(0, 1)));
        assert!(pairs.contains(&(1, 1)));
    }

    #[test]
    fn undef_joins_undef() {
        let left = table(&[&[-1]]);
        let right = table(&[&[-1]]);
        assert_eq!(run_join(&left, &right, true), vec![(0, 0)]);
    }

    #[test]
    fn partial_undef_in_two_columns() {
        let left = table(&[&[-1, 1], &[2, 1]]);
        let right = table(&[&[1, 1], &[2, 1]]);
        let pairs = run_join(&left, &right, true);
        // (U,1) matches both right rows, (2,1) matches (2,1).
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&(0, 0)));
        assert!(pairs.contains(&(0, 1)));
        assert!(pairs.contains(&(1, 1)));
    }

    #[test]
    fn out_of_order_emissions_are_counted() {
        // Left (U,9) unifies with right (1,U) into key (1,9), which the
        // merge emits before the direct combination (1,5) of the later
        // left row. That inversion must be reported.
        let left = table(&[&[-1, 9], &[1, 5]]);
        let right = table(&[&[1, -1]]);
        let left_view = left.as_view();
        let right_view = right.as_view();
        let mut pairs = Vec::new();
        let outcome = zipper_join_with_undef(
            &left_view,
            &right_view,
            ZipperConfig {
                undef_aware: true,
                track_left_matches: false,
            },
            &mut |i, j| {
                pairs.push((i, j));
                Ok(())
            },
            &|| Ok(()),
        )
        .unwrap();
        assert_eq!(pairs, vec![(0, 0), (1, 0)]);
        assert_eq!(outcome.num_out_of_order, 1);
    }

    #[test]
    fn cancellation_probe_aborts_long_joins() {
        use crate::error::CancellationReason;
        let rows: Vec<Vec<i64>> = (0..100).map(|_| vec![1]).collect();
        let row_refs: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
        let left = table(&row_refs);
        let right = table(&row_refs);
        let left_view = left.as_view();
        let right_view = right.as_view();
        // 100 x 100 equal keys emit 10000 rows, crossing several probe
        // intervals of an always-cancelled handle.
        let result = zipper_join_with_undef(
            &left_view,
            &right_view,
            ZipperConfig {
                undef_aware: false,
                track_left_matches: false,
            },
            &mut |_, _| Ok(()),
            &|| Err(QueryError::Cancelled(CancellationReason::Manual)),
        );
        assert!(matches!(result, Err(QueryError::Cancelled(_))));
    }

    #[test]
    fn matched_left_bitmap_drives_outer_joins() {
        let left = table(&[&[1], &[2], &[3]]);
        let right = table(&[&[2]]);
        let left_view = left.as_view();
        let right_view = right.as_view();
        let outcome = zipper_join_with_undef(
            &left_view,
            &right_view,
            ZipperConfig {
                undef_aware: false,
                track_left_matches: true,
            },
            &mut |_, _| Ok(()),
            &|| Ok(()),
        )
        .unwrap();
        assert_eq!(outcome.matched_left, vec![false, true, false]);
    }

    #[test]
    fn probe_finds_masked_patterns() {
        let side = table(&[&[-1, -1], &[-1, 3], &[1, -1], &[1, 2]]);
        let view = side.as_view();
        let mut out = Vec::new();
        find_smaller_undef_ranges(&[Id::from_int(1), Id::from_int(3)], &view, &mut out);
        // (U,U), (U,3) and (1,U) are all compatible and smaller; (1,2) is
        // defined and different.
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[test]
    fn probe_with_undef_key_scans_the_prefix() {
        let side = table(&[&[-1, 7], &[1, 2], &[1, 7]]);
        let view = side.as_view();
        let mut out = Vec::new();
        // Key (1, U) is compatible with (U,7) and (1,2); (1,7) is not
        // smaller than the key... it is larger, so only smaller rows count.
        find_smaller_undef_ranges(&[Id::from_int(1), Id::UNDEF], &view, &mut out);
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn join_column_mapping_round_trip() {
        // left width 3 joining (l1, r0), (l2, r2) with right width 3.
        let mapping = JoinColumnMapping::new(&[(1, 0), (2, 2)], 3, 3);
        assert_eq!(mapping.permutation_left(), &[1, 2, 0]);
        assert_eq!(mapping.permutation_right(), &[0, 2, 1]);
        // Kernel layout: [j0, j1, l0, r1]; expected: [l0, l1, l2, r1].
        assert_eq!(mapping.permutation_result(), &[2, 0, 1, 3]);
    }

    #[test]
    fn row_adder_combines_and_pads() {
        let left = table(&[&[1, 10]]);
        let right = table(&[&[1, 20]]);
        let out = IdTable::with_columns(3, TrackedAllocator::unlimited());
        let mut adder = RowAdder::new(1, left.as_view(), right.as_view(), out);
        adder.add_row(0, 0).unwrap();
        adder.add_optional_row(0).unwrap();
        let result = adder.into_table();
        assert_eq!(
            result.row(0),
            vec![Id::from_int(1), Id::from_int(10), Id::from_int(20)]
        );
        assert_eq!(
            result.row(1),
            vec![Id::from_int(1), Id::from_int(10), Id::UNDEF]
        );
    }

    #[test]
    fn undef_join_value_comes_from_the_defined_side() {
        let left = table(&[&[-1, 10]]);
        let right = table(&[&[7, 20]]);
        let out = IdTable::with_columns(3, TrackedAllocator::unlimited());
        let mut adder = RowAdder::new(1, left.as_view(), right.as_view(), out);
        adder.add_row(0, 0).unwrap();
        let result = adder.into_table();
        assert_eq!(result.at(0, 0), Id::from_int(7));
    }
}
