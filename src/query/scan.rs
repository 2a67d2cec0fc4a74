//! Executes an `AccessPlan` against one table under a snapshot, producing
//! the visible tuples it names. Index scans narrow the candidate row-id set
//! before the MVCC visibility check; a full scan walks every row-id the
//! table currently knows about.

use crate::core::DbResult;
use crate::index::IndexManager;
use crate::mvcc::{CommitLog, Snapshot};
use crate::storage::{Storage, Table};

use super::planner::AccessPlan;
use super::tuple::Tuple;

pub fn scan_table(
    table: &Table,
    plan: &AccessPlan,
    indexes: &IndexManager,
    snapshot: &Snapshot,
    clog: &CommitLog,
) -> Vec<Tuple> {
    let row_ids: Vec<u64> = match plan {
        AccessPlan::FullScan => table.all_row_ids().collect(),
        AccessPlan::IndexExact { index_name, value } => indexes
            .index(index_name)
            .map(|idx| idx.search(value).into_iter().collect())
            .unwrap_or_default(),
        AccessPlan::IndexRange {
            index_name,
            min,
            min_inclusive,
            max,
            max_inclusive,
        } => indexes
            .index(index_name)
            .map(|idx| {
                idx.range(min.as_ref(), *min_inclusive, max.as_ref(), *max_inclusive)
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default(),
    };

    row_ids
        .into_iter()
        .filter_map(|row_id| table.get_visible(row_id, snapshot, clog))
        .map(|version| Tuple::from_row(table, version.row_id, &version.data))
        .collect()
}

/// Looks up a table by name and runs `scan_table` against it, the shape
/// every call site in `select.rs`/`database` needs.
pub fn scan_named_table(
    storage: &Storage,
    table_name: &str,
    plan: &AccessPlan,
    indexes: &IndexManager,
    snapshot: &Snapshot,
    clog: &CommitLog,
) -> DbResult<Vec<Tuple>> {
    let table = storage.table(table_name)?;
    Ok(scan_table(table, plan, indexes, snapshot, clog))
}
