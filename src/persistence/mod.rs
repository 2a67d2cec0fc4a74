//! Full-database snapshot, the `save_all`/`load_all` half of the public API.
//! One file per table (schema plus the newest *visible*
//! version of each row — no history, unlike the WAL), one file per B-tree
//! index, and one file for every ANN graph's live vectors (the graph
//! topology itself is never serialized; `load_all` rebuilds it the same way
//! WAL recovery does, via `AnnIndexManager::rebuild`). Not byte-compatible
//! with the WAL format in `crate::wal`; this is a separate, simpler format
//! meant for an explicit save/restore cycle rather than crash durability.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ann::AnnIndexManager;
use crate::config::VectorSearchConfig;
use crate::core::{Column, DatabaseError, DbResult, Value};
use crate::index::{BTreeIndex, IndexManager};
use crate::mvcc::{CommitLog, Snapshot};
use crate::storage::Storage;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    tables: Vec<String>,
    indexes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableSnapshot {
    name: String,
    columns: Vec<Column>,
    rows: Vec<(u64, HashMap<String, Value>)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnnGraphSnapshot {
    table: String,
    column: String,
    dimension: usize,
    vectors: Vec<(u64, Vec<f32>)>,
}

fn load_failed(context: &str, err: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::PersistenceLoadFailed(format!("{context}: {err}"))
}

/// Writes the newest-visible-version snapshot of every table, every B-tree
/// index, and every ANN graph's live vectors into `dir`. Overwrites any
/// snapshot already there.
pub fn save_all(
    dir: &Path,
    storage: &Storage,
    indexes: &IndexManager,
    ann: &AnnIndexManager,
    snapshot: &Snapshot,
    clog: &CommitLog,
) -> DbResult<()> {
    let tables_dir = dir.join("tables");
    let indexes_dir = dir.join("indexes");
    fs::create_dir_all(&tables_dir)?;
    fs::create_dir_all(&indexes_dir)?;

    let mut table_names = Vec::new();
    for table in storage.tables() {
        let rows: Vec<(u64, HashMap<String, Value>)> = table
            .get_all_rows(snapshot, clog)
            .into_iter()
            .map(|v| (v.row_id, v.data.clone()))
            .collect();
        let snap = TableSnapshot {
            name: table.name.clone(),
            columns: table.columns.clone(),
            rows,
        };
        fs::write(tables_dir.join(format!("{}.bincode", table.name)), bincode::serialize(&snap)?)?;
        table_names.push(table.name.clone());
    }

    let mut index_names = Vec::new();
    for idx in indexes.all_indexes() {
        fs::write(indexes_dir.join(format!("{}.bincode", idx.name)), bincode::serialize(idx)?)?;
        index_names.push(idx.name.clone());
    }

    let ann_snapshots: Vec<AnnGraphSnapshot> = ann
        .all_graphs()
        .map(|(table, column, dimension, vectors)| AnnGraphSnapshot {
            table: table.to_string(),
            column: column.to_string(),
            dimension,
            vectors,
        })
        .collect();
    fs::write(dir.join("ann.bincode"), bincode::serialize(&ann_snapshots)?)?;

    let manifest = Manifest {
        tables: table_names,
        indexes: index_names,
    };
    fs::write(dir.join("manifest.bincode"), bincode::serialize(&manifest)?)?;
    Ok(())
}

/// Rebuilds `Storage`/`IndexManager`/`AnnIndexManager` from a directory
/// `save_all` wrote. Every loaded row gets `xmin = 0`, the same
/// bootstrap-tx-id convention WAL recovery uses, so it's unconditionally
/// visible to every snapshot without needing any CLOG entries.
pub fn load_all(dir: &Path, vector_config: VectorSearchConfig) -> DbResult<(Storage, IndexManager, AnnIndexManager)> {
    let manifest_bytes = fs::read(dir.join("manifest.bincode")).map_err(|e| load_failed("reading manifest", e))?;
    let manifest: Manifest = bincode::deserialize(&manifest_bytes).map_err(|e| load_failed("decoding manifest", e))?;

    let mut storage = Storage::new();
    for name in &manifest.tables {
        let path = dir.join("tables").join(format!("{name}.bincode"));
        let bytes = fs::read(&path).map_err(|e| load_failed(&format!("reading table {name}"), e))?;
        let snap: TableSnapshot =
            bincode::deserialize(&bytes).map_err(|e| load_failed(&format!("decoding table {name}"), e))?;
        storage.create_table(&snap.name, snap.columns)?;
        let table = storage.table_mut(&snap.name)?;
        for (row_id, data) in snap.rows {
            table.insert_with_id(row_id, data, 0)?;
        }
    }

    let mut indexes = IndexManager::new();
    for name in &manifest.indexes {
        let path = dir.join("indexes").join(format!("{name}.bincode"));
        let bytes = fs::read(&path).map_err(|e| load_failed(&format!("reading index {name}"), e))?;
        let idx: BTreeIndex =
            bincode::deserialize(&bytes).map_err(|e| load_failed(&format!("decoding index {name}"), e))?;
        indexes.install(idx);
    }

    let ann_bytes = fs::read(dir.join("ann.bincode")).map_err(|e| load_failed("reading ann graphs", e))?;
    let ann_snapshots: Vec<AnnGraphSnapshot> =
        bincode::deserialize(&ann_bytes).map_err(|e| load_failed("decoding ann graphs", e))?;
    let mut ann = AnnIndexManager::new(vector_config);
    for snap in ann_snapshots {
        ann.rebuild(&snap.table, &snap.column, snap.dimension, snap.vectors.into_iter());
    }

    Ok((storage, indexes, ann))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::mvcc::TransactionManager;

    #[test]
    fn save_and_load_round_trips_rows_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let txn = TransactionManager::new();
        let mut storage = Storage::new();
        storage
            .create_table("u", vec![Column::new("id", DataType::Int), Column::new("n", DataType::Int)])
            .unwrap();
        let (tx, _) = txn.begin();
        {
            let table = storage.table_mut("u").unwrap();
            let mut row = HashMap::new();
            row.insert("id".to_string(), Value::Int(1));
            row.insert("n".to_string(), Value::Int(10));
            table.insert_with_id(1, row, tx).unwrap();
        }
        txn.commit(tx).unwrap();

        let mut indexes = IndexManager::new();
        indexes.create_index("ix_n", "u", "n", false).unwrap();
        indexes.index_mut("ix_n").unwrap().insert(&Value::Int(10), 1);

        let ann = AnnIndexManager::new(VectorSearchConfig::default());
        let snapshot = txn.current_snapshot();

        txn.with_clog(|clog| save_all(dir.path(), &storage, &indexes, &ann, &snapshot, clog))
            .unwrap();

        let (loaded_storage, loaded_indexes, _) = load_all(dir.path(), VectorSearchConfig::default()).unwrap();
        let table = loaded_storage.table("u").unwrap();
        assert_eq!(table.row_count(), 1);
        assert!(loaded_indexes.index("ix_n").unwrap().contains(&Value::Int(10), 1));
    }
}
