use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::ann::AnnIndexManager;
use crate::core::{Column, DataType, DatabaseError, DbResult, Value};
use crate::index::IndexManager;
use crate::mvcc::TransactionManager;
use crate::storage::Storage;

use super::format::{DdlPayload, RecordType, WalFileHeader, WalRecord, HEADER_LEN};
use super::row_codec::{decode_row, decode_update_payload};

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryStats {
    pub files_scanned: usize,
    pub records_replayed: usize,
    pub max_tx_id_seen: u64,
}

/// Two-pass crash recovery: scan every segment once to learn
/// which transactions committed, then redo DDL and committed-DML records in
/// log order against empty storage/index/ANN state. A torn write at the tail
/// of a file (bad CRC, truncated length) ends replay of that file only —
/// everything before it still applies.
pub fn recover(
    wal_dir: impl AsRef<Path>,
    storage: &mut Storage,
    indexes: &mut IndexManager,
    ann: &mut AnnIndexManager,
    txn_manager: &TransactionManager,
) -> DbResult<RecoveryStats> {
    let wal_dir = wal_dir.as_ref();
    let mut stats = RecoveryStats::default();
    if !wal_dir.exists() {
        return Ok(stats);
    }

    let mut sequences: Vec<u64> = fs::read_dir(wal_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?.to_string();
            name.strip_prefix("wal-")?.strip_suffix(".log")?.parse::<u64>().ok()
        })
        .collect();
    sequences.sort_unstable();

    let mut records: Vec<WalRecord> = Vec::new();
    for seq in &sequences {
        let path = wal_dir.join(format!("wal-{seq:020}.log"));
        let bytes = fs::read(&path)?;
        if bytes.len() < HEADER_LEN {
            continue;
        }
        WalFileHeader::decode(&bytes)?;
        let mut pos = HEADER_LEN;
        while pos < bytes.len() {
            match WalRecord::decode(&bytes[pos..]) {
                Ok((record, consumed)) => {
                    stats.max_tx_id_seen = stats.max_tx_id_seen.max(record.tx_id);
                    records.push(record);
                    pos += consumed;
                }
                Err(_) => break,
            }
        }
        stats.files_scanned += 1;
    }

    let mut committed: HashSet<u64> = HashSet::new();
    for record in &records {
        if record.record_type == RecordType::CommitTx {
            committed.insert(record.tx_id);
        }
    }

    for record in &records {
        let is_ddl = matches!(
            record.record_type,
            RecordType::CreateTable
                | RecordType::DropTable
                | RecordType::CreateIndex
                | RecordType::DropIndex
                | RecordType::AlterTableAddColumn
                | RecordType::AlterTableDropColumn
                | RecordType::AlterTableRenameColumn
                | RecordType::AlterTableRenameTable
        );
        let should_apply = is_ddl || record.tx_id == 0 || committed.contains(&record.tx_id);
        if !should_apply {
            continue;
        }
        apply_record(record, storage, indexes, ann)?;
        stats.records_replayed += 1;
    }

    txn_manager.fast_forward(stats.max_tx_id_seen);
    for table in storage.tables_mut() {
        if let Some(max_row_id) = table.all_row_ids().max() {
            table.fast_forward_row_id(max_row_id);
        }
    }

    Ok(stats)
}

fn column_def_to_column(def: crate::parser::ColumnDef) -> Column {
    match def.embedding_dim {
        Some(dim) => Column::with_embedding_dim(def.name, dim),
        None => Column::new(def.name, def.data_type),
    }
}

fn ddl_payload(record: &WalRecord) -> DbResult<DdlPayload> {
    bincode::deserialize(&record.data).map_err(DatabaseError::from)
}

fn apply_record(
    record: &WalRecord,
    storage: &mut Storage,
    indexes: &mut IndexManager,
    ann: &mut AnnIndexManager,
) -> DbResult<()> {
    match record.record_type {
        RecordType::BeginTx | RecordType::CommitTx | RecordType::RollbackTx | RecordType::Checkpoint => Ok(()),

        RecordType::InsertRow => {
            let row = decode_row(&record.data)?;
            let table = storage.table_mut(&record.table_name)?;
            table.insert_with_id(record.row_id, row.clone(), 0)?;
            let embedding_columns: Vec<String> = table
                .columns
                .iter()
                .filter(|c| c.data_type == DataType::Embedding)
                .map(|c| c.name.clone())
                .collect();
            indexes.on_insert(&record.table_name, record.row_id, &row);
            for column in embedding_columns {
                if let Some(Value::Embedding(v)) = row.get(&column) {
                    ann.insert(&record.table_name, &column, record.row_id, v);
                }
            }
            Ok(())
        }

        RecordType::DeleteRow => {
            let table = storage.table_mut(&record.table_name)?;
            let Some(old_row) = table.head_version(record.row_id).map(|v| v.data.clone()) else {
                return Ok(());
            };
            let embedding_columns: Vec<String> = table
                .columns
                .iter()
                .filter(|c| c.data_type == DataType::Embedding)
                .map(|c| c.name.clone())
                .collect();
            table.physical_delete(record.row_id);
            indexes.on_delete(&record.table_name, record.row_id, &old_row);
            for column in embedding_columns {
                ann.remove(&record.table_name, &column, record.row_id);
            }
            Ok(())
        }

        RecordType::UpdateRow => {
            let (_, new_row) = decode_update_payload(&record.data)?;
            let table = storage.table_mut(&record.table_name)?;
            let Some(old_row) = table.head_version(record.row_id).map(|v| v.data.clone()) else {
                return Ok(());
            };
            table.replay_overwrite(record.row_id, new_row.clone())?;
            let embedding_columns: Vec<String> = table
                .columns
                .iter()
                .filter(|c| c.data_type == DataType::Embedding)
                .map(|c| c.name.clone())
                .collect();
            indexes.on_update(&record.table_name, record.row_id, &old_row, &new_row);
            for column in embedding_columns {
                if let (Some(Value::Embedding(old_v)), Some(Value::Embedding(new_v))) =
                    (old_row.get(&column), new_row.get(&column))
                {
                    if old_v != new_v {
                        ann.remove(&record.table_name, &column, record.row_id);
                        ann.insert(&record.table_name, &column, record.row_id, new_v);
                    }
                }
            }
            Ok(())
        }

        RecordType::CreateTable => {
            if let DdlPayload::CreateTable { columns } = ddl_payload(record)? {
                let cols: Vec<Column> = columns.into_iter().map(column_def_to_column).collect();
                match storage.create_table(&record.table_name, cols) {
                    Ok(()) | Err(DatabaseError::TableAlreadyExists(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            } else {
                Ok(())
            }
        }

        RecordType::DropTable => {
            indexes.drop_table_indexes(&record.table_name);
            ann.drop_table(&record.table_name);
            let _ = storage.drop_table(&record.table_name);
            Ok(())
        }

        RecordType::CreateIndex => {
            if let DdlPayload::CreateIndex { index_name, column } = ddl_payload(record)? {
                match indexes.create_index(&index_name, &record.table_name, &column, false) {
                    Ok(()) => {}
                    Err(DatabaseError::ValidationFailed(_)) => return Ok(()),
                    Err(e) => return Err(e),
                }
                let rows: Vec<(u64, Option<Value>)> = {
                    let table = storage.table(&record.table_name)?;
                    table
                        .all_row_ids()
                        .filter_map(|row_id| {
                            table.head_version(row_id).map(|v| (row_id, v.data.get(&column).cloned()))
                        })
                        .collect()
                };
                if let Some(idx) = indexes.index_mut(&index_name) {
                    for (row_id, value) in rows {
                        if let Some(v) = value {
                            idx.insert(&v, row_id);
                        }
                    }
                }
            }
            Ok(())
        }

        RecordType::DropIndex => {
            if let DdlPayload::DropIndex { index_name } = ddl_payload(record)? {
                let _ = indexes.drop_index(&index_name);
            }
            Ok(())
        }

        RecordType::AlterTableAddColumn => {
            if let DdlPayload::AlterAddColumn { column } = ddl_payload(record)? {
                let table = storage.table_mut(&record.table_name)?;
                table.columns.push(column_def_to_column(column));
            }
            Ok(())
        }

        RecordType::AlterTableDropColumn => {
            if let DdlPayload::AlterDropColumn { column } = ddl_payload(record)? {
                let table = storage.table_mut(&record.table_name)?;
                table.columns.retain(|c| c.name != column);
                indexes.drop_table_indexes(&record.table_name);
                ann.drop_column(&record.table_name, &column);
            }
            Ok(())
        }

        RecordType::AlterTableRenameColumn => {
            if let DdlPayload::AlterRenameColumn { old_name, new_name } = ddl_payload(record)? {
                let table = storage.table_mut(&record.table_name)?;
                if let Some(col) = table.columns.iter_mut().find(|c| c.name == old_name) {
                    col.name = new_name;
                }
            }
            Ok(())
        }

        RecordType::AlterTableRenameTable => {
            if let DdlPayload::AlterRenameTable { new_name } = ddl_payload(record)? {
                let _ = storage.rename_table(&record.table_name, &new_name);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::AnnIndexManager;
    use crate::config::VectorSearchConfig;
    use crate::mvcc::Snapshot;
    use crate::wal::row_codec::{encode_row, encode_update_payload};
    use crate::wal::writer::WalWriter;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn recovers_committed_insert_and_skips_uncommitted() {
        let dir = tempdir().unwrap();
        let writer = WalWriter::open(dir.path(), 16 * 1024 * 1024).unwrap();

        let create_payload = bincode::serialize(&DdlPayload::CreateTable {
            columns: vec![crate::parser::ColumnDef {
                name: "n".to_string(),
                data_type: DataType::Int,
                embedding_dim: None,
            }],
        })
        .unwrap();
        writer
            .append(WalRecord {
                record_type: RecordType::CreateTable,
                tx_id: 0,
                lsn: 0,
                table_name: "t".to_string(),
                row_id: 0,
                data: create_payload,
            })
            .unwrap();

        let mut row = HashMap::new();
        row.insert("n".to_string(), Value::Int(10));
        writer
            .append(WalRecord {
                record_type: RecordType::InsertRow,
                tx_id: 1,
                lsn: 0,
                table_name: "t".to_string(),
                row_id: 1,
                data: encode_row(&row),
            })
            .unwrap();
        writer
            .append(WalRecord {
                record_type: RecordType::CommitTx,
                tx_id: 1,
                lsn: 0,
                table_name: String::new(),
                row_id: 0,
                data: vec![],
            })
            .unwrap();

        let mut row2 = HashMap::new();
        row2.insert("n".to_string(), Value::Int(99));
        writer
            .append(WalRecord {
                record_type: RecordType::InsertRow,
                tx_id: 2,
                lsn: 0,
                table_name: "t".to_string(),
                row_id: 2,
                data: encode_row(&row2),
            })
            .unwrap();
        // tx 2 never commits.

        let mut storage = Storage::new();
        let mut indexes = IndexManager::new();
        let mut ann = AnnIndexManager::new(VectorSearchConfig::default());
        let txn_manager = TransactionManager::new();

        let stats = recover(dir.path(), &mut storage, &mut indexes, &mut ann, &txn_manager).unwrap();
        assert_eq!(stats.records_replayed, 2); // CreateTable + the committed InsertRow

        let table = storage.table("t").unwrap();
        assert_eq!(table.row_count(), 1);
        assert!(table.head_version(1).is_some());
        assert!(table.head_version(2).is_none());
    }

    #[test]
    fn replayed_update_leaves_a_single_visible_vacuumable_version() {
        let dir = tempdir().unwrap();
        let writer = WalWriter::open(dir.path(), 16 * 1024 * 1024).unwrap();

        let create_payload = bincode::serialize(&DdlPayload::CreateTable {
            columns: vec![crate::parser::ColumnDef {
                name: "n".to_string(),
                data_type: DataType::Int,
                embedding_dim: None,
            }],
        })
        .unwrap();
        writer
            .append(WalRecord {
                record_type: RecordType::CreateTable,
                tx_id: 0,
                lsn: 0,
                table_name: "t".to_string(),
                row_id: 0,
                data: create_payload,
            })
            .unwrap();

        let mut old_row = HashMap::new();
        old_row.insert("n".to_string(), Value::Int(10));
        writer
            .append(WalRecord {
                record_type: RecordType::InsertRow,
                tx_id: 1,
                lsn: 0,
                table_name: "t".to_string(),
                row_id: 1,
                data: encode_row(&old_row),
            })
            .unwrap();
        writer
            .append(WalRecord {
                record_type: RecordType::CommitTx,
                tx_id: 1,
                lsn: 0,
                table_name: String::new(),
                row_id: 0,
                data: vec![],
            })
            .unwrap();

        let mut new_row = HashMap::new();
        new_row.insert("n".to_string(), Value::Int(20));
        writer
            .append(WalRecord {
                record_type: RecordType::UpdateRow,
                tx_id: 2,
                lsn: 0,
                table_name: "t".to_string(),
                row_id: 1,
                data: encode_update_payload(&old_row, &new_row),
            })
            .unwrap();
        writer
            .append(WalRecord {
                record_type: RecordType::CommitTx,
                tx_id: 2,
                lsn: 0,
                table_name: String::new(),
                row_id: 0,
                data: vec![],
            })
            .unwrap();

        let mut storage = Storage::new();
        let mut indexes = IndexManager::new();
        let mut ann = AnnIndexManager::new(VectorSearchConfig::default());
        let txn_manager = TransactionManager::new();

        recover(dir.path(), &mut storage, &mut indexes, &mut ann, &txn_manager).unwrap();

        let table = storage.table_mut("t").unwrap();
        let head = table.head_version(1).unwrap();
        assert_eq!(head.data.get("n"), Some(&Value::Int(20)));
        assert_eq!(head.xmin, 0);
        assert_eq!(head.xmax, 0);

        // The head is the only version in the chain, so visibility and
        // vacuum both see exactly one live version, not a dead leftover
        // whose xmax falsely reads as "live".
        let clog = crate::mvcc::CommitLog::new();
        let snapshot = Snapshot::new(0, Default::default());
        let visible = table.get_all_rows(&snapshot, &clog);
        assert_eq!(visible.len(), 1);

        let stats = table.vacuum(u64::MAX, &clog);
        assert_eq!(stats.versions_removed, 0);
        assert_eq!(stats.total_versions, 1);
    }
}
