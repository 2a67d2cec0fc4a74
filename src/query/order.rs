//! ORDER BY execution: stable multi-key column sort, `SIMILARITY TO`
//! (delegates to the ANN index, search-then-filter), and `VIBES` (a
//! documented non-contractual shuffle) built against the ANN manager.

use std::cmp::Ordering;

use crate::ann::AnnIndexManager;
use crate::core::{DbResult, Value};
use crate::mvcc::{CommitLog, Snapshot};
use crate::parser::ast::{OrderItem, SortDir};
use crate::storage::{Storage, Table};

use super::tuple::Tuple;

/// Splitmix64, reused from the ANN graph's deterministic level assignment
/// so `VIBES` is reproducible given the same seed without pulling in a
/// `rand` dependency.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Null-first, type-mismatch-equal column comparison, the standard
/// ORDER BY rule.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    a.compare(b).unwrap_or(Ordering::Equal)
}

/// Applies a `Column`-only ORDER BY list (stable, multi-key). `Similarity`/
/// `Vibes` items are handled by their own dedicated functions and must not
/// reach this one (the caller in `select.rs` dispatches on the order list's
/// shape before calling either path).
pub fn sort_by_columns(rows: &mut [Tuple], keys: &[(String, SortDir)]) {
    rows.sort_by(|a, b| {
        for (col, dir) in keys {
            let av = a.get(col).cloned().unwrap_or(Value::Null);
            let bv = b.get(col).cloned().unwrap_or(Value::Null);
            let ord = compare_values(&av, &bv);
            let ord = if *dir == SortDir::Desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Fisher-Yates shuffle driven by a splitmix64 stream; explicitly not part
/// of any ordering contract so callers
/// must not rely on reproducing a particular permutation across versions.
pub fn shuffle_vibes(rows: &mut [Tuple], seed: u64) {
    let mut state = seed;
    let len = rows.len();
    for i in (1..len).rev() {
        let j = (splitmix64(&mut state) % (i as u64 + 1)) as usize;
        rows.swap(i, j);
    }
}

/// Picks the embedding column `ORDER BY SIMILARITY TO` should search: the
/// named one, or else the first embedding column declared on the table,
/// since if no dimension is specified the first embedding column
/// discovered is used.
fn resolve_similarity_column(table: &Table, dimension_column: Option<&str>) -> Option<String> {
    if let Some(col) = dimension_column {
        return Some(col.to_string());
    }
    table
        .columns
        .iter()
        .find(|c| c.data_type == crate::core::DataType::Embedding)
        .map(|c| c.name.clone())
}

/// Implements `ORDER BY SIMILARITY TO '<literal>' [ON col]`: embeds the
/// literal text, searches the ANN graph for the `limit` nearest row-ids,
/// fetches those rows under `snapshot`, and returns them nearest-first.
/// WHERE filtering happens afterward in the caller (search-then-filter per
/// , since a pre-filter would defeat the point of an ANN index.
pub fn similarity_search(
    storage: &Storage,
    table_name: &str,
    literal: &str,
    dimension_column: Option<&str>,
    limit: usize,
    embed: &dyn Fn(&str) -> Vec<f32>,
    ann: &AnnIndexManager,
    snapshot: &Snapshot,
    clog: &CommitLog,
) -> DbResult<Vec<Tuple>> {
    let table = storage.table(table_name)?;
    let Some(column) = resolve_similarity_column(table, dimension_column) else {
        return Ok(Vec::new());
    };
    let query_vector = embed(literal);
    let hits = ann.search(table_name, &column, &query_vector, limit)?;

    let mut out = Vec::with_capacity(hits.len());
    for (row_id, _distance) in hits {
        if let Some(version) = table.get_visible(row_id, snapshot, clog) {
            out.push(Tuple::from_row(table, version.row_id, &version.data));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(n: i64) -> Tuple {
        let mut t = Tuple::new(n as u64);
        t.push("t.n", Value::Int(n));
        t
    }

    #[test]
    fn sort_by_single_column_ascending() {
        let mut rows = vec![row(3), row(1), row(2)];
        sort_by_columns(&mut rows, &[("t.n".to_string(), SortDir::Asc)]);
        let ns: Vec<i64> = rows.iter().map(|t| t.get("t.n").unwrap().as_int().unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn nulls_sort_first() {
        let mut rows = vec![row(1), {
            let mut t = Tuple::new(9);
            t.push("t.n", Value::Null);
            t
        }];
        sort_by_columns(&mut rows, &[("t.n".to_string(), SortDir::Asc)]);
        assert!(rows[0].get("t.n").unwrap().is_null());
    }

    #[test]
    fn vibes_shuffle_is_a_permutation() {
        let mut rows: Vec<Tuple> = (0..10).map(row).collect();
        let original_ids: std::collections::HashSet<u64> = rows.iter().map(|t| t.row_id).collect();
        shuffle_vibes(&mut rows, 42);
        let shuffled_ids: std::collections::HashSet<u64> = rows.iter().map(|t| t.row_id).collect();
        assert_eq!(original_ids, shuffled_ids);
    }
}
