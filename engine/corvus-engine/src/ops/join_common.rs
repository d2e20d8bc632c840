//! Computation and bookkeeping shared by the join family.

use corvus_core::{IdTable, LocalVocab};

use crate::context::SharedExecutionContext;
use crate::error::QueryError;
use crate::join::{zipper_join_with_undef, JoinColumnMapping, RowAdder, ZipperConfig};
use crate::result::QueryResult;
use crate::tree::SharedTree;
use crate::variable::{ColumnIndex, VariableColumnMap};

/// Variable map of a join result: left columns keep their positions, right
/// non-join columns are appended in their original order.
pub(crate) fn join_variable_columns(
    left: &SharedTree,
    right: &SharedTree,
    join_columns: &[(ColumnIndex, ColumnIndex)],
) -> VariableColumnMap {
    let left_width = left.result_width();
    let mut map = left.variable_columns();
    let right_join: Vec<ColumnIndex> = join_columns.iter().map(|&(_, r)| r).collect();
    for (var, rc) in right.variable_columns() {
        if right_join.contains(&rc) {
            continue;
        }
        let rank = (0..rc).filter(|c| !right_join.contains(c)).count();
        map.insert(var, left_width + rank);
    }
    map
}

/// Names of the join variables, for descriptors.
pub(crate) fn join_variable_names(
    left: &SharedTree,
    join_columns: &[(ColumnIndex, ColumnIndex)],
) -> String {
    let vars = left.variable_columns();
    join_columns
        .iter()
        .filter_map(|&(lc, _)| {
            vars.iter()
                .find(|(_, &c)| c == lc)
                .map(|(var, _)| var.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drive the zipper over two child results.
///
/// `optional` turns the join into the left-outer variant: left rows without
/// a partner are emitted once, padded with UNDEF. The result is sorted on
/// the left join columns; a re-sort happens exactly when UNDEF matching or
/// padding produced out-of-order rows.
pub(crate) fn compute_zipper_join(
    ctx: &SharedExecutionContext,
    left_tree: &SharedTree,
    right_tree: &SharedTree,
    join_columns: &[(ColumnIndex, ColumnIndex)],
    optional: bool,
) -> Result<QueryResult, QueryError> {
    let left = left_tree.get_result(false)?;
    let right = right_tree.get_result(false)?;
    ctx.check_cancellation()?;

    let left_table = left.id_table();
    let right_table = right.id_table();
    let num_join = join_columns.len();
    let width = left_table.num_columns() + right_table.num_columns() - num_join;
    let sorted_on: Vec<ColumnIndex> = join_columns.iter().map(|&(l, _)| l).collect();
    let vocab = LocalVocab::merged(left.local_vocab(), right.local_vocab());

    tracing::debug!(
        left_rows = left_table.num_rows(),
        right_rows = right_table.num_rows(),
        num_join,
        optional,
        "computing zipper join"
    );

    if left_table.is_empty() || (right_table.is_empty() && !optional) {
        let table = IdTable::with_columns(width, ctx.allocator().clone());
        return Ok(QueryResult::new(table, sorted_on, vocab));
    }

    let mapping = JoinColumnMapping::new(join_columns, left_table.num_columns(), right_table.num_columns());
    let left_join_view = left_table.as_column_subset_view(mapping.jcs_left());
    let right_join_view = right_table.as_column_subset_view(mapping.jcs_right());
    // No UNDEF anywhere in the join columns permits the cheap merge.
    let is_cheap = !left_join_view.contains_undef() && !right_join_view.contains_undef();

    let left_permuted = left_table.as_column_subset_view(mapping.permutation_left());
    let right_permuted = right_table.as_column_subset_view(mapping.permutation_right());
    let output = IdTable::with_columns(width, ctx.allocator().clone());
    let mut adder = RowAdder::new(num_join, left_permuted, right_permuted, output);

    let outcome = zipper_join_with_undef(
        &left_join_view,
        &right_join_view,
        ZipperConfig {
            undef_aware: !is_cheap,
            track_left_matches: optional,
        },
        &mut |i, j| adder.add_row(i, j),
        &|| ctx.check_cancellation(),
    )?;

    let mut num_padded = 0usize;
    if optional {
        for (row, matched) in outcome.matched_left.iter().enumerate() {
            if !matched {
                adder.add_optional_row(row)?;
                num_padded += 1;
            }
        }
    }

    let mut table = adder.into_table();
    if outcome.num_out_of_order > 0 || num_padded > 0 {
        ctx.check_cancellation()?;
        let kernel_join_columns: Vec<ColumnIndex> = (0..num_join).collect();
        table.sort_by_columns(&kernel_join_columns);
    }
    table.set_column_subset(mapping.permutation_result());
    ctx.check_cancellation()?;
    Ok(QueryResult::new(table, sorted_on, vocab))
}

/// Anti-join: the left rows without any UNDEF-aware partner on the right.
pub(crate) fn compute_minus(
    ctx: &SharedExecutionContext,
    left_tree: &SharedTree,
    right_tree: &SharedTree,
    join_columns: &[(ColumnIndex, ColumnIndex)],
) -> Result<QueryResult, QueryError> {
    let left = left_tree.get_result(false)?;
    let right = right_tree.get_result(false)?;
    ctx.check_cancellation()?;

    let left_table = left.id_table();
    let right_table = right.id_table();
    let sorted_on = left_tree.result_sorted_on();
    let vocab = left.local_vocab().clone();

    let mapping = JoinColumnMapping::new(join_columns, left_table.num_columns(), right_table.num_columns());
    let left_join_view = left_table.as_column_subset_view(mapping.jcs_left());
    let right_join_view = right_table.as_column_subset_view(mapping.jcs_right());
    let is_cheap = !left_join_view.contains_undef() && !right_join_view.contains_undef();

    let outcome = zipper_join_with_undef(
        &left_join_view,
        &right_join_view,
        ZipperConfig {
            undef_aware: !is_cheap,
            track_left_matches: true,
        },
        &mut |_, _| Ok(()),
        &|| ctx.check_cancellation(),
    )?;

    let mut table = IdTable::with_columns(left_table.num_columns(), ctx.allocator().clone());
    for (row, matched) in outcome.matched_left.iter().enumerate() {
        if !matched {
            table.push_row(&left_table.row(row))?;
        }
        if row % 4096 == 0 {
            ctx.check_cancellation()?;
        }
    }
    Ok(QueryResult::new(table, sorted_on, vocab))
}
