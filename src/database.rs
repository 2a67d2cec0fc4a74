//! The top-level object the public API talks to: `execute(sql)`, explicit
//! transaction control, WAL/persistence wiring, and configuration. Fans out
//! over `Statement` variants the way a server-side executor would. The
//! shared engine state (storage, indexes, ANN graphs, WAL, transaction
//! manager) lives behind an `Arc` so that `Database::connect()` can hand out
//! independent connections, each with its own explicit-transaction slot, onto
//! the same underlying database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::ann::AnnIndexManager;
use crate::config::{DatabaseConfig, ValidationMode, VectorSearchConfig};
use crate::core::{Column, DataType, DatabaseError, DbResult, Value};
use crate::expr::eval_bool;
use crate::index::IndexManager;
use crate::mvcc::{CommitLog, Snapshot, TransactionManager};
use crate::parser::ast::{AlterTableOp, ColumnDef, Statement};
use crate::parser::parse_statement;
use crate::persistence;
use crate::query::{execute_select, QueryContext, QueryResult};
use crate::storage::{Storage, Table};
use crate::wal::format::{DdlPayload, RecordType, WalRecord};
use crate::wal::recovery::recover;
use crate::wal::row_codec::{encode_row, encode_update_payload};
use crate::wal::writer::WalWriter;

/// Deterministic stand-in for the text-to-vector embedding model, which is
/// treated as an external collaborator and kept out of scope here.
/// Splitmix64-seeded from the input bytes so the same literal always embeds
/// to the same vector within a process, which is all `SIMILARITY TO` needs
/// to be testable. Callers with a real embedding model should construct via
/// `Database::with_embedder` instead.
fn default_embed(dim: usize) -> impl Fn(&str) -> Vec<f32> {
    move |text: &str| {
        let mut state = text.bytes().fold(0xcbf29ce484222325u64, |acc, b| {
            (acc ^ b as u64).wrapping_mul(0x100000001b3)
        });
        (0..dim)
            .map(|_| {
                state = state.wrapping_add(0x9E3779B97F4A7C15);
                let mut z = state;
                z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
                z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
                z ^= z >> 31;
                // map to roughly [-1, 1]
                ((z >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32
            })
            .collect()
    }
}

const DEFAULT_EMBED_DIM: usize = 16;

/// One entry in an explicit transaction's operation log. INSERT doesn't
/// need an owned copy of the row — the head
/// version is still physically present after rollback, so it's re-read live.
enum Operation {
    Insert {
        table: String,
        row_id: u64,
    },
    Delete {
        table: String,
        row_id: u64,
        old_row: HashMap<String, Value>,
    },
    Update {
        table: String,
        row_id: u64,
        old_row: HashMap<String, Value>,
        new_row: HashMap<String, Value>,
    },
}

struct TxState {
    tx_id: u64,
    snapshot: Snapshot,
    ops: Vec<Operation>,
}

/// Everything shared across every connection to one database: the storage
/// engine, indexes, ANN graphs, transaction manager, WAL, and configuration.
/// A `Database` value is a connection onto an `Engine` — independent
/// connections share the same `Engine` through `Arc` but each keeps its own
/// explicit-transaction state, the way a server keeps one global storage
/// engine but a `Transaction` per client connection.
struct Engine {
    storage: RwLock<Storage>,
    indexes: RwLock<IndexManager>,
    ann: Mutex<AnnIndexManager>,
    txn_manager: TransactionManager,
    wal: RwLock<Option<WalWriter>>,
    config: RwLock<DatabaseConfig>,
    vector_config: Mutex<VectorSearchConfig>,
    persistence_dir: Mutex<Option<(PathBuf, bool)>>,
    embed: Box<dyn Fn(&str) -> Vec<f32> + Send + Sync>,
    vacuum_counters: Mutex<HashMap<String, u64>>,
    vibes_seed: AtomicU64,
}

/// A connection onto the hybrid vector-relational engine. Holds its own
/// explicit-transaction state so two `Database` values obtained from the
/// same `connect()` family can each have a `BEGIN` open at once with
/// distinct transaction ids, concurrently, the way two client connections
/// to the same server would.
pub struct Database {
    engine: Arc<Engine>,
    explicit_tx: Mutex<Option<TxState>>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_embedder(default_embed(DEFAULT_EMBED_DIM))
    }

    /// Constructs a database with a caller-supplied text embedder, for
    /// plugging in a real vectorization model instead of the deterministic
    /// placeholder `new()` uses.
    pub fn with_embedder(embed: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        Self {
            engine: Arc::new(Engine {
                storage: RwLock::new(Storage::new()),
                indexes: RwLock::new(IndexManager::new()),
                ann: Mutex::new(AnnIndexManager::new(VectorSearchConfig::default())),
                txn_manager: TransactionManager::new(),
                wal: RwLock::new(None),
                config: RwLock::new(DatabaseConfig::default()),
                vector_config: Mutex::new(VectorSearchConfig::default()),
                persistence_dir: Mutex::new(None),
                embed: Box::new(embed),
                vacuum_counters: Mutex::new(HashMap::new()),
                vibes_seed: AtomicU64::new(0x2545F4914F6CDD1D),
            }),
            explicit_tx: Mutex::new(None),
        }
    }

    pub fn with_config(config: DatabaseConfig) -> Self {
        let db = Self::new();
        *db.engine.config.write().expect("lock poisoned") = config;
        db
    }

    /// Opens a new, independent connection to the same underlying engine:
    /// same storage, indexes, WAL, and ANN graphs, but its own explicit
    /// transaction slot. Two connections can each `BEGIN` their own
    /// transaction and hold it open concurrently with distinct ids, the way
    /// two clients connected to the same database server would.
    pub fn connect(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            explicit_tx: Mutex::new(None),
        }
    }

    pub fn config(&self) -> DatabaseConfig {
        self.engine.config.read().expect("lock poisoned").clone()
    }

    pub fn set_config(&self, config: DatabaseConfig) {
        *self.engine.config.write().expect("lock poisoned") = config;
    }

    /// `database.init_vector_search(M, ef_construction)`.
    /// `ef_search` has no corresponding parameter in the public API, so it
    /// keeps whatever value it already had (the `VectorSearchConfig`
    /// default, unless a previous call changed it).
    pub fn init_vector_search(&self, m: usize, ef_construction: usize) {
        let mut vc = self.engine.vector_config.lock().expect("lock poisoned");
        vc.m = m;
        vc.ef_construction = ef_construction;
        self.engine.ann.lock().expect("lock poisoned").configure(*vc);
    }

    /// Opens (or creates) a WAL directory and replays it against empty
    /// in-memory state before accepting new writes.
    pub fn enable_wal(&self, path: impl AsRef<Path>) -> DbResult<()> {
        let path = path.as_ref();
        let max_file_size = self.engine.config.read().expect("lock poisoned").wal_max_file_size;

        {
            let mut storage = self.engine.storage.write().expect("lock poisoned");
            let mut indexes = self.engine.indexes.write().expect("lock poisoned");
            let mut ann = self.engine.ann.lock().expect("lock poisoned");
            recover(path, &mut storage, &mut indexes, &mut ann, &self.engine.txn_manager)?;
            self.rebuild_ann_graphs(&storage, &mut ann);
        }

        let writer = WalWriter::open(path, max_file_size)?;
        *self.engine.wal.write().expect("lock poisoned") = Some(writer);
        Ok(())
    }

    /// ANN graphs aren't WAL-logged: rebuild every
    /// embedding column's graph from whatever rows replay left behind.
    fn rebuild_ann_graphs(&self, storage: &Storage, ann: &mut AnnIndexManager) {
        let snapshot = self.engine.txn_manager.current_snapshot();
        self.engine.txn_manager.with_clog(|clog| {
            for table in storage.tables() {
                for column in table.columns.iter().filter(|c| c.data_type == DataType::Embedding) {
                    let rows: Vec<(u64, Vec<f32>)> = table
                        .get_all_rows(&snapshot, clog)
                        .into_iter()
                        .filter_map(|v| match v.data.get(&column.name) {
                            Some(Value::Embedding(e)) => Some((v.row_id, e.clone())),
                            _ => None,
                        })
                        .collect();
                    if !rows.is_empty() {
                        let dim = column.embedding_dim.unwrap_or(0) as usize;
                        ann.rebuild(&table.name, &column.name, dim, rows.into_iter());
                    }
                }
            }
        });
    }

    /// `database.enable_persistence(dir, autosave)`. Does not
    /// load anything by itself; call `load_all` explicitly to restore a
    /// previous snapshot.
    pub fn enable_persistence(&self, dir: impl AsRef<Path>, autosave: bool) {
        *self.engine.persistence_dir.lock().expect("lock poisoned") = Some((dir.as_ref().to_path_buf(), autosave));
        self.engine.config.write().expect("lock poisoned").autosave = autosave;
    }

    /// Full-database snapshot: one file per table (schema + newest visible
    /// versions only), one file per B-tree index, one file for the ANN
    /// graphs. Not byte-compatible with the WAL.
    pub fn save_all(&self, dir: impl AsRef<Path>) -> DbResult<()> {
        let storage = self.engine.storage.read().expect("lock poisoned");
        let indexes = self.engine.indexes.read().expect("lock poisoned");
        let ann = self.engine.ann.lock().expect("lock poisoned");
        let snapshot = self.engine.txn_manager.current_snapshot();
        self.engine.txn_manager
            .with_clog(|clog| persistence::save_all(dir.as_ref(), &storage, &indexes, &ann, &snapshot, clog))
    }

    /// Loads a snapshot written by `save_all`, replacing all in-memory
    /// state. Does not touch the WAL; callers that run both should
    /// `load_all` before `enable_wal` so WAL replay lands on top of the
    /// snapshot rather than the reverse.
    pub fn load_all(&self, dir: impl AsRef<Path>) -> DbResult<()> {
        let mut storage = self.engine.storage.write().expect("lock poisoned");
        let mut indexes = self.engine.indexes.write().expect("lock poisoned");
        let mut ann = self.engine.ann.lock().expect("lock poisoned");
        let (loaded_storage, loaded_indexes, loaded_ann) = persistence::load_all(dir.as_ref(), *self.engine.vector_config.lock().expect("lock poisoned"))?;
        *storage = loaded_storage;
        *indexes = loaded_indexes;
        *ann = loaded_ann;
        let max_row_id = storage.tables().filter_map(|t| t.all_row_ids().max()).max().unwrap_or(0);
        self.engine.txn_manager.fast_forward(max_row_id);
        for table in storage.tables() {
            if let Some(m) = table.all_row_ids().max() {
                table.fast_forward_row_id(m);
            }
        }
        Ok(())
    }

    /// Called on graceful shutdown; honors `autosave` if persistence is
    /// enabled.
    pub fn close(&self) -> DbResult<()> {
        let target = self.engine.persistence_dir.lock().expect("lock poisoned").clone();
        if let Some((dir, true)) = target {
            self.save_all(dir)?;
        }
        Ok(())
    }

    /// Executes one SQL statement. Mutating statements run inside an
    /// implicit auto-commit transaction unless an explicit `BEGIN` is
    /// already open.
    pub fn execute(&self, sql: &str) -> DbResult<QueryResult> {
        let statement = parse_statement(sql)?;
        match statement {
            Statement::Begin => self.begin(),
            Statement::Commit => self.commit(),
            Statement::Rollback => self.rollback(),
            Statement::Select(select) => self.run_select(&select),
            Statement::Vacuum { table } => self.run_vacuum(table.as_deref()),
            other => self.run_mutation(other),
        }
    }

    fn begin(&self) -> DbResult<QueryResult> {
        let mut explicit = self.explicit_tx.lock().expect("lock poisoned");
        if explicit.is_some() {
            return Err(DatabaseError::ValidationFailed("transaction already in progress".to_string()));
        }
        let (tx_id, snapshot) = self.engine.txn_manager.begin();
        *explicit = Some(TxState { tx_id, snapshot, ops: Vec::new() });
        Ok(QueryResult::default())
    }

    fn commit(&self) -> DbResult<QueryResult> {
        let tx = self
            .explicit_tx
            .lock()
            .expect("lock poisoned")
            .take()
            .ok_or(DatabaseError::NoActiveTransaction)?;
        self.engine.txn_manager.commit(tx.tx_id)?;
        self.append_control_record(RecordType::CommitTx, tx.tx_id)?;
        Ok(QueryResult::default())
    }

    fn rollback(&self) -> DbResult<QueryResult> {
        let tx = self
            .explicit_tx
            .lock()
            .expect("lock poisoned")
            .take()
            .ok_or(DatabaseError::NoActiveTransaction)?;
        self.engine.txn_manager.rollback(tx.tx_id)?;
        self.append_control_record(RecordType::RollbackTx, tx.tx_id)?;

        // Undo index bookkeeping in reverse order; MVCC visibility alone
        // already hides the aborted writes from future readers.
        let mut indexes = self.engine.indexes.write().expect("lock poisoned");
        let storage = self.engine.storage.read().expect("lock poisoned");
        for op in tx.ops.into_iter().rev() {
            match op {
                Operation::Insert { table, row_id } => {
                    if let Ok(t) = storage.table(&table) {
                        if let Some(row) = t.head_version(row_id).map(|v| v.data.clone()) {
                            indexes.on_delete(&table, row_id, &row);
                        }
                    }
                }
                Operation::Delete { table, row_id, old_row } => {
                    indexes.on_insert(&table, row_id, &old_row);
                }
                Operation::Update { table, row_id, old_row, new_row } => {
                    indexes.on_update(&table, row_id, &new_row, &old_row);
                }
            }
        }
        Ok(QueryResult::default())
    }

    fn append_control_record(&self, record_type: RecordType, tx_id: u64) -> DbResult<()> {
        let wal = self.engine.wal.read().expect("lock poisoned");
        if let Some(writer) = wal.as_ref() {
            writer.append(WalRecord {
                record_type,
                tx_id,
                lsn: 0,
                table_name: String::new(),
                row_id: 0,
                data: vec![],
            })?;
        }
        Ok(())
    }

    fn run_select(&self, select: &crate::parser::ast::SelectStatement) -> DbResult<QueryResult> {
        let storage = self.engine.storage.read().expect("lock poisoned");
        let indexes = self.engine.indexes.read().expect("lock poisoned");
        let ann = self.engine.ann.lock().expect("lock poisoned");

        let explicit = self.explicit_tx.lock().expect("lock poisoned");
        let owned_snapshot;
        let snapshot = match explicit.as_ref() {
            Some(tx) => &tx.snapshot,
            None => {
                owned_snapshot = self.engine.txn_manager.current_snapshot();
                &owned_snapshot
            }
        };

        let seed = self.engine.vibes_seed.fetch_add(0x9E3779B97F4A7C15, Ordering::SeqCst);
        self.engine.txn_manager.with_clog(|clog| {
            let ctx = QueryContext {
                storage: &storage,
                indexes: &indexes,
                ann: &ann,
                snapshot,
                clog,
                embed: &self.engine.embed,
                vibes_seed: seed,
            };
            execute_select(select, &ctx)
        })
    }

    fn run_vacuum(&self, table_name: Option<&str>) -> DbResult<QueryResult> {
        let mut storage = self.engine.storage.write().expect("lock poisoned");
        let watermark = self.engine.txn_manager.oldest_active_tx();
        let mut removed = 0usize;
        let mut tables_touched = 0usize;

        self.engine.txn_manager.with_clog(|clog| {
            match table_name {
                Some(name) => {
                    let stats = storage.table_mut(name)?.vacuum(watermark, clog);
                    removed += stats.versions_removed;
                    tables_touched += 1;
                }
                None => {
                    for table in storage.tables_mut() {
                        let stats = table.vacuum(watermark, clog);
                        removed += stats.versions_removed;
                        tables_touched += 1;
                    }
                }
            }
            Ok::<(), DatabaseError>(())
        })?;

        Ok(QueryResult {
            columns: vec!["message".to_string()],
            rows: vec![vec![Value::Text(format!(
                "VACUUM complete. Removed {removed} dead version(s) across {tables_touched} table(s)."
            ))]],
        })
    }

    /// Runs one mutating statement (DDL/DML) through the strict ordering
    /// requires: validate, reserve row-id, serialize+append
    /// WAL, apply to the version chain, update indexes, update ANN, record
    /// the operation for rollback. Wraps the whole thing in an implicit
    /// auto-commit transaction unless one is already open explicitly.
    fn run_mutation(&self, statement: Statement) -> DbResult<QueryResult> {
        let (tx_id, is_implicit) = {
            let explicit = self.explicit_tx.lock().expect("lock poisoned");
            match explicit.as_ref() {
                Some(tx) => (tx.tx_id, false),
                None => (0, true),
            }
        };

        let (tx_id, snapshot) = if is_implicit {
            self.engine.txn_manager.begin()
        } else {
            (tx_id, self.explicit_tx.lock().expect("lock poisoned").as_ref().unwrap().snapshot.clone())
        };

        let result = self.apply_mutation(statement, tx_id, &snapshot);

        match result {
            Ok((query_result, op, touched_table)) => {
                if let Some(op) = op {
                    if !is_implicit {
                        let mut explicit = self.explicit_tx.lock().expect("lock poisoned");
                        if let Some(tx) = explicit.as_mut() {
                            tx.ops.push(op);
                        }
                    }
                }
                if is_implicit {
                    self.engine.txn_manager.commit(tx_id)?;
                    self.append_control_record(RecordType::CommitTx, tx_id)?;
                    if let Some(table) = touched_table {
                        self.maybe_auto_vacuum(&table);
                    }
                }
                Ok(query_result)
            }
            Err(e) => {
                if is_implicit {
                    let _ = self.engine.txn_manager.rollback(tx_id);
                }
                Err(e)
            }
        }
    }

    fn maybe_auto_vacuum(&self, table: &str) {
        let every = self.engine.config.read().expect("lock poisoned").auto_vacuum_every;
        if every == 0 {
            return;
        }
        let mut counters = self.engine.vacuum_counters.lock().expect("lock poisoned");
        let count = counters.entry(table.to_string()).or_insert(0);
        *count += 1;
        if *count % every == 0 {
            let watermark = self.engine.txn_manager.oldest_active_tx();
            if let Ok(mut storage) = self.engine.storage.write() {
                if let Ok(t) = storage.table_mut(table) {
                    self.engine.txn_manager.with_clog(|clog| {
                        t.vacuum(watermark, clog);
                    });
                }
            }
        }
    }

    /// The actual per-statement-kind logic, sharing one `tx_id`/`snapshot`
    /// whether the caller wrapped it implicitly or the statement runs
    /// inside an explicit transaction. Returns the user-facing result, the
    /// operation-log entry (if any) for rollback bookkeeping, and the name
    /// of the table touched (for auto-vacuum).
    fn apply_mutation(
        &self,
        statement: Statement,
        tx_id: u64,
        snapshot: &Snapshot,
    ) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        match statement {
            Statement::CreateTable { name, if_not_exists, columns } => {
                self.ddl_create_table(name, if_not_exists, columns, tx_id)
            }
            Statement::DropTable { name, if_exists } => self.ddl_drop_table(name, if_exists, tx_id),
            Statement::CreateIndex { name, table, column } => self.ddl_create_index(name, table, column, tx_id),
            Statement::DropIndex { name } => self.ddl_drop_index(name, tx_id),
            Statement::AlterTable { table, op } => self.ddl_alter_table(table, op, tx_id),
            Statement::Insert { table, columns, values } => self.dml_insert(table, columns, values, tx_id),
            Statement::Update { table, assignments, filter } => {
                self.dml_update(table, assignments, filter, tx_id, snapshot)
            }
            Statement::Delete { table, filter } => self.dml_delete(table, filter, tx_id, snapshot),
            Statement::Select(_) | Statement::Begin | Statement::Commit | Statement::Rollback | Statement::Vacuum { .. } => {
                unreachable!("handled by execute() before reaching apply_mutation")
            }
        }
    }

    fn ddl_create_table(
        &self,
        name: String,
        if_not_exists: bool,
        columns: Vec<ColumnDef>,
        tx_id: u64,
    ) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        let mode = self.engine.config.read().expect("lock poisoned").validation_mode;
        self.check_duplicate_embedding_dims(&name, &columns, mode)?;

        {
            let storage = self.engine.storage.read().expect("lock poisoned");
            if storage.has_table(&name) {
                if if_not_exists {
                    return Ok((QueryResult::default(), None, None));
                }
                return Err(DatabaseError::TableAlreadyExists(name));
            }
        }

        let cols: Vec<Column> = columns
            .iter()
            .cloned()
            .map(|c| match c.embedding_dim {
                Some(dim) => Column::with_embedding_dim(c.name, dim),
                None => Column::new(c.name, c.data_type),
            })
            .collect();
        for col in &cols {
            col.validate()?;
        }

        let payload = bincode::serialize(&DdlPayload::CreateTable { columns })?;
        self.write_wal(RecordType::CreateTable, tx_id, &name, 0, payload)?;

        self.engine.storage.write().expect("lock poisoned").create_table(&name, cols)?;
        Ok((QueryResult::default(), None, None))
    }

    /// `DuplicateEmbeddingDimension`: two embedding columns in
    /// the same table declaring the same dimension collide in the ANN
    /// manager's `(table, column)` keying only if they also share a column
    /// name, which schema validation already forbids — so this is read as
    /// the stricter, more useful rule a semantic validator would actually
    /// flag: no two embedding columns on one table may share a dimension,
    /// since that is almost always a copy-paste mistake in the schema.
    fn check_duplicate_embedding_dims(&self, table: &str, columns: &[ColumnDef], mode: ValidationMode) -> DbResult<()> {
        if mode == ValidationMode::Disabled {
            return Ok(());
        }
        let mut seen = std::collections::HashSet::new();
        for col in columns.iter().filter(|c| c.data_type == DataType::Embedding) {
            if let Some(dim) = col.embedding_dim {
                if !seen.insert(dim) {
                    let message = format!("duplicate embedding dimension column in table {table}");
                    return match mode {
                        ValidationMode::Strict => Err(DatabaseError::DuplicateEmbeddingDimension(table.to_string())),
                        ValidationMode::Warnings => {
                            eprintln!("warning: {message}");
                            Ok(())
                        }
                        ValidationMode::Disabled => unreachable!(),
                    };
                }
            }
        }
        Ok(())
    }

    fn ddl_drop_table(
        &self,
        name: String,
        if_exists: bool,
        tx_id: u64,
    ) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        {
            let storage = self.engine.storage.read().expect("lock poisoned");
            if !storage.has_table(&name) {
                if if_exists {
                    return Ok((QueryResult::default(), None, None));
                }
                return Err(DatabaseError::TableNotFound(name));
            }
        }

        let payload = bincode::serialize(&DdlPayload::DropTable)?;
        self.write_wal(RecordType::DropTable, tx_id, &name, 0, payload)?;

        self.engine.storage.write().expect("lock poisoned").drop_table(&name)?;
        self.engine.indexes.write().expect("lock poisoned").drop_table_indexes(&name);
        self.engine.ann.lock().expect("lock poisoned").drop_table(&name);

        Ok((QueryResult::default(), None, None))
    }

    fn ddl_create_index(
        &self,
        name: String,
        table: String,
        column: String,
        tx_id: u64,
    ) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        {
            let storage = self.engine.storage.read().expect("lock poisoned");
            let t = storage.table(&table)?;
            if t.column(&column).is_none() {
                return Err(DatabaseError::ColumnNotFound(column));
            }
        }
        {
            let indexes = self.engine.indexes.read().expect("lock poisoned");
            if indexes.index(&name).is_some() {
                return Err(DatabaseError::ValidationFailed(format!("index {name} already exists")));
            }
        }

        let payload = bincode::serialize(&DdlPayload::CreateIndex {
            index_name: name.clone(),
            column: column.clone(),
        })?;
        self.write_wal(RecordType::CreateIndex, tx_id, &table, 0, payload)?;

        self.engine.indexes.write().expect("lock poisoned").create_index(&name, &table, &column, false)?;

        // Backfill from every currently-visible row.
        {
            let storage = self.engine.storage.read().expect("lock poisoned");
            let t = storage.table(&table)?;
            let snapshot = self.engine.txn_manager.current_snapshot();
            let rows: Vec<(u64, Value)> = self.engine.txn_manager.with_clog(|clog| {
                t.get_all_rows(&snapshot, clog)
                    .into_iter()
                    .filter_map(|v| v.data.get(&column).cloned().map(|value| (v.row_id, value)))
                    .collect()
            });
            let mut indexes = self.engine.indexes.write().expect("lock poisoned");
            if let Some(idx) = indexes.index_mut(&name) {
                for (row_id, value) in rows {
                    idx.insert(&value, row_id);
                }
            }
        }

        Ok((QueryResult::default(), None, None))
    }

    fn ddl_drop_index(&self, name: String, tx_id: u64) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        let table = {
            let indexes = self.engine.indexes.read().expect("lock poisoned");
            indexes
                .index(&name)
                .map(|i| i.table.clone())
                .ok_or_else(|| DatabaseError::ValidationFailed(format!("index {name} not found")))?
        };

        let payload = bincode::serialize(&DdlPayload::DropIndex { index_name: name.clone() })?;
        self.write_wal(RecordType::DropIndex, tx_id, &table, 0, payload)?;

        self.engine.indexes.write().expect("lock poisoned").drop_index(&name)?;
        Ok((QueryResult::default(), None, None))
    }

    fn ddl_alter_table(
        &self,
        table: String,
        op: AlterTableOp,
        tx_id: u64,
    ) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        match op {
            AlterTableOp::AddColumn(col_def) => {
                {
                    let storage = self.engine.storage.read().expect("lock poisoned");
                    storage.table(&table)?;
                }
                let column = match col_def.embedding_dim {
                    Some(dim) => Column::with_embedding_dim(col_def.name.clone(), dim),
                    None => Column::new(col_def.name.clone(), col_def.data_type),
                };
                column.validate()?;

                let payload = bincode::serialize(&DdlPayload::AlterAddColumn { column: col_def })?;
                self.write_wal(RecordType::AlterTableAddColumn, tx_id, &table, 0, payload)?;

                self.engine.storage.write().expect("lock poisoned").table_mut(&table)?.columns.push(column);
            }
            AlterTableOp::DropColumn(column) => {
                {
                    let storage = self.engine.storage.read().expect("lock poisoned");
                    storage.table(&table)?;
                }

                let payload = bincode::serialize(&DdlPayload::AlterDropColumn { column: column.clone() })?;
                self.write_wal(RecordType::AlterTableDropColumn, tx_id, &table, 0, payload)?;

                self.engine.storage
                    .write()
                    .expect("lock poisoned")
                    .table_mut(&table)?
                    .columns
                    .retain(|c| c.name != column);
                self.engine.indexes.write().expect("lock poisoned").drop_table_indexes(&table);
                self.engine.ann.lock().expect("lock poisoned").drop_column(&table, &column);
            }
            AlterTableOp::RenameColumn(old_name, new_name) => {
                {
                    let storage = self.engine.storage.read().expect("lock poisoned");
                    let t = storage.table(&table)?;
                    t.column(&old_name).ok_or_else(|| DatabaseError::ColumnNotFound(old_name.clone()))?;
                }

                let payload = bincode::serialize(&DdlPayload::AlterRenameColumn {
                    old_name: old_name.clone(),
                    new_name: new_name.clone(),
                })?;
                self.write_wal(RecordType::AlterTableRenameColumn, tx_id, &table, 0, payload)?;

                let mut storage = self.engine.storage.write().expect("lock poisoned");
                let t = storage.table_mut(&table)?;
                if let Some(c) = t.columns.iter_mut().find(|c| c.name == old_name) {
                    c.name = new_name;
                }
            }
            AlterTableOp::RenameTable(new_name) => {
                {
                    let storage = self.engine.storage.read().expect("lock poisoned");
                    if !storage.has_table(&table) {
                        return Err(DatabaseError::TableNotFound(table));
                    }
                    if storage.has_table(&new_name) {
                        return Err(DatabaseError::TableAlreadyExists(new_name));
                    }
                }

                let payload = bincode::serialize(&DdlPayload::AlterRenameTable { new_name: new_name.clone() })?;
                self.write_wal(RecordType::AlterTableRenameTable, tx_id, &table, 0, payload)?;

                self.engine.storage.write().expect("lock poisoned").rename_table(&table, &new_name)?;
            }
        }
        Ok((QueryResult::default(), None, Some(table)))
    }

    fn dml_insert(
        &self,
        table: String,
        columns: Option<Vec<String>>,
        values: Vec<Value>,
        tx_id: u64,
    ) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        let max_embeddings = self.engine.config.read().expect("lock poisoned").max_embeddings_per_row;

        let row = {
            let storage = self.engine.storage.read().expect("lock poisoned");
            let t = storage.table(&table)?;
            self.build_row(t, columns.as_deref(), &values, max_embeddings)?
        };

        let row_id = {
            let storage = self.engine.storage.read().expect("lock poisoned");
            storage.table(&table)?.reserve_row_id()
        };

        let payload = encode_row(&row);
        self.write_wal(RecordType::InsertRow, tx_id, &table, row_id, payload)?;

        {
            let mut storage = self.engine.storage.write().expect("lock poisoned");
            let t = storage.table_mut(&table)?;
            if let Err(e) = t.insert_with_id(row_id, row.clone(), tx_id) {
                return Err(e);
            }
        }

        self.engine.indexes.write().expect("lock poisoned").on_insert(&table, row_id, &row);
        self.index_embeddings_on_insert(&table, row_id, &row);

        Ok((QueryResult::default(), Some(Operation::Insert { table: table.clone(), row_id }), Some(table)))
    }

    fn index_embeddings_on_insert(&self, table: &str, row_id: u64, row: &HashMap<String, Value>) {
        let mut ann = self.engine.ann.lock().expect("lock poisoned");
        for (column, value) in row {
            if let Value::Embedding(v) = value {
                ann.insert(table, column, row_id, v);
            }
        }
    }

    /// Builds the full column->value map for an INSERT, filling
    /// unspecified columns with `NULL`, checking column existence and type
    /// compatibility, and enforcing `max_embeddings_per_row`.
    fn build_row(
        &self,
        table: &Table,
        columns: Option<&[String]>,
        values: &[Value],
        max_embeddings: usize,
    ) -> DbResult<HashMap<String, Value>> {
        let names: Vec<String> = match columns {
            Some(cols) => cols.to_vec(),
            None => table.columns.iter().map(|c| c.name.clone()).collect(),
        };
        if names.len() != values.len() {
            return Err(DatabaseError::ValidationFailed(format!(
                "expected {} values, got {}",
                names.len(),
                values.len()
            )));
        }

        let mut row: HashMap<String, Value> = table.columns.iter().map(|c| (c.name.clone(), Value::Null)).collect();
        for (name, value) in names.iter().zip(values.iter()) {
            let column = table.column(name).ok_or_else(|| DatabaseError::ColumnNotFound(name.clone()))?;
            if !column.data_type.matches(value) {
                return Err(DatabaseError::TypeMismatch(format!(
                    "column {} expects {}, got {}",
                    name,
                    column.data_type,
                    value.type_name()
                )));
            }
            if let (DataType::Embedding, Value::Embedding(v)) = (column.data_type, value) {
                if Some(v.len() as u32) != column.embedding_dim {
                    return Err(DatabaseError::TypeMismatch(format!(
                        "column {} expects {:?}-dim embedding, got {}",
                        name,
                        column.embedding_dim,
                        v.len()
                    )));
                }
            }
            row.insert(name.clone(), value.clone());
        }

        let embedding_count = table
            .columns
            .iter()
            .filter(|c| c.data_type == DataType::Embedding)
            .filter(|c| !matches!(row.get(&c.name), Some(Value::Null) | None))
            .count();
        if embedding_count > max_embeddings {
            return Err(DatabaseError::TooManyEmbeddings { max: max_embeddings, got: embedding_count });
        }

        Ok(row)
    }

    fn dml_update(
        &self,
        table: String,
        assignments: Vec<(String, Value)>,
        filter: Option<crate::parser::ast::Expr>,
        tx_id: u64,
        snapshot: &Snapshot,
    ) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        let row_ids: Vec<u64> = {
            let storage = self.engine.storage.read().expect("lock poisoned");
            let t = storage.table(&table)?;
            self.engine.txn_manager.with_clog(|clog| {
                t.get_all_rows(snapshot, clog)
                    .into_iter()
                    .filter(|v| match &filter {
                        Some(expr) => self.row_matches(t, v, expr).unwrap_or(false),
                        None => true,
                    })
                    .map(|v| v.row_id)
                    .collect()
            })
        };

        let mut last_op = None;
        for row_id in row_ids {
            let (old_row, new_row) = {
                let storage = self.engine.storage.read().expect("lock poisoned");
                let t = storage.table(&table)?;
                let old = t.head_version(row_id).map(|v| v.data.clone()).ok_or(DatabaseError::RowNotFound(row_id))?;
                let mut new = old.clone();
                for (col, val) in &assignments {
                    if t.column(col).is_none() {
                        return Err(DatabaseError::ColumnNotFound(col.clone()));
                    }
                    new.insert(col.clone(), val.clone());
                }
                (old, new)
            };

            let payload = encode_update_payload(&old_row, &new_row);
            self.write_wal(RecordType::UpdateRow, tx_id, &table, row_id, payload)?;

            {
                let mut storage = self.engine.storage.write().expect("lock poisoned");
                let t = storage.table_mut(&table)?;
                for (col, val) in &assignments {
                    self.engine.txn_manager.with_clog(|clog| t.update(row_id, col, val.clone(), tx_id, clog))?;
                }
            }

            self.engine.indexes.write().expect("lock poisoned").on_update(&table, row_id, &old_row, &new_row);
            self.reindex_embeddings_on_update(&table, row_id, &old_row, &new_row);

            last_op = Some(Operation::Update { table: table.clone(), row_id, old_row, new_row });
        }

        Ok((QueryResult::default(), last_op, Some(table)))
    }

    fn reindex_embeddings_on_update(
        &self,
        table: &str,
        row_id: u64,
        old_row: &HashMap<String, Value>,
        new_row: &HashMap<String, Value>,
    ) {
        let mut ann = self.engine.ann.lock().expect("lock poisoned");
        for (column, new_value) in new_row {
            if let Value::Embedding(new_v) = new_value {
                let changed = !matches!(old_row.get(column), Some(Value::Embedding(old_v)) if old_v == new_v);
                if changed {
                    ann.remove(table, column, row_id);
                    ann.insert(table, column, row_id, new_v);
                }
            }
        }
    }

    fn dml_delete(
        &self,
        table: String,
        filter: Option<crate::parser::ast::Expr>,
        tx_id: u64,
        snapshot: &Snapshot,
    ) -> DbResult<(QueryResult, Option<Operation>, Option<String>)> {
        let row_ids: Vec<u64> = {
            let storage = self.engine.storage.read().expect("lock poisoned");
            let t = storage.table(&table)?;
            self.engine.txn_manager.with_clog(|clog| {
                t.get_all_rows(snapshot, clog)
                    .into_iter()
                    .filter(|v| match &filter {
                        Some(expr) => self.row_matches(t, v, expr).unwrap_or(false),
                        None => true,
                    })
                    .map(|v| v.row_id)
                    .collect()
            })
        };

        let mut last_op = None;
        for row_id in row_ids {
            let old_row = {
                let storage = self.engine.storage.read().expect("lock poisoned");
                storage
                    .table(&table)?
                    .head_version(row_id)
                    .map(|v| v.data.clone())
                    .ok_or(DatabaseError::RowNotFound(row_id))?
            };

            self.write_wal(RecordType::DeleteRow, tx_id, &table, row_id, vec![])?;

            {
                let mut storage = self.engine.storage.write().expect("lock poisoned");
                let t = storage.table_mut(&table)?;
                self.engine.txn_manager.with_clog(|clog| t.delete(row_id, tx_id, clog))?;
            }

            self.engine.indexes.write().expect("lock poisoned").on_delete(&table, row_id, &old_row);
            {
                let mut ann = self.engine.ann.lock().expect("lock poisoned");
                for (column, value) in &old_row {
                    if matches!(value, Value::Embedding(_)) {
                        ann.remove(&table, column, row_id);
                    }
                }
            }

            last_op = Some(Operation::Delete { table: table.clone(), row_id, old_row });
        }

        Ok((QueryResult::default(), last_op, Some(table)))
    }

    /// WHERE evaluation against a raw `RowVersion` outside the query
    /// engine's own scan path, used by UPDATE/DELETE to decide which rows a
    /// filter selects (they mutate the heap directly rather than going
    /// through `query::select`, which only ever reads).
    fn row_matches(&self, table: &Table, version: &crate::storage::RowVersion, expr: &crate::parser::ast::Expr) -> DbResult<bool> {
        let tuple = crate::query::Tuple::from_row(table, version.row_id, &version.data);
        struct NoSubqueries;
        impl crate::expr::SubqueryRunner for NoSubqueries {
            fn run_subquery(&self, _select: &crate::parser::ast::SelectStatement) -> DbResult<Vec<Vec<Value>>> {
                Err(DatabaseError::InvalidSubquery(
                    "subqueries in UPDATE/DELETE filters are not supported".to_string(),
                ))
            }
        }
        eval_bool(expr, &tuple, &NoSubqueries)
    }

    fn write_wal(&self, record_type: RecordType, tx_id: u64, table_name: &str, row_id: u64, data: Vec<u8>) -> DbResult<()> {
        let wal = self.engine.wal.read().expect("lock poisoned");
        if let Some(writer) = wal.as_ref() {
            writer.append(WalRecord {
                record_type,
                tx_id,
                lsn: 0,
                table_name: table_name.to_string(),
                row_id,
                data,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_db() -> Database {
        Database::new()
    }

    #[test]
    fn create_insert_select_round_trip() {
        let db = fresh_db();
        db.execute("CREATE TABLE u (id int, n int)").unwrap();
        db.execute("INSERT INTO u (id, n) VALUES (1, 10)").unwrap();
        db.execute("INSERT INTO u (id, n) VALUES (2, 20)").unwrap();
        let result = db.execute("SELECT id, n FROM u WHERE n = 10").unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(1), Value::Int(10)]]);
    }

    #[test]
    fn snapshot_isolation_of_writes() {
        let db = fresh_db();
        db.execute("CREATE TABLE u (id int, n int)").unwrap();
        db.execute("INSERT INTO u (id, n) VALUES (1, 10)").unwrap();

        // Two independent connections against the same engine: `reader`
        // opens an explicit transaction and keeps it open while `writer`
        // commits a conflicting update on its own connection.
        let reader = db.connect();
        let writer = db.connect();

        reader.execute("BEGIN").unwrap();
        let select_before = reader.execute("SELECT n FROM u WHERE id = 1").unwrap();
        assert_eq!(select_before.rows, vec![vec![Value::Int(10)]]);

        writer.execute("UPDATE u SET n = 20 WHERE id = 1").unwrap();

        // Still inside its own transaction, `reader` must keep seeing the
        // value as of its snapshot, not the writer's committed change.
        let select_during = reader.execute("SELECT n FROM u WHERE id = 1").unwrap();
        assert_eq!(select_during.rows, vec![vec![Value::Int(10)]]);

        reader.execute("COMMIT").unwrap();
        let select_after = reader.execute("SELECT n FROM u WHERE id = 1").unwrap();
        assert_eq!(select_after.rows, vec![vec![Value::Int(20)]]);
    }

    #[test]
    fn two_connections_can_each_hold_their_own_transaction() {
        let db = fresh_db();
        db.execute("CREATE TABLE u (id int)").unwrap();

        let a = db.connect();
        let b = db.connect();
        a.execute("BEGIN").unwrap();
        b.execute("BEGIN").unwrap();

        // Both transactions are open at once; neither interferes with the
        // other's explicit-transaction slot.
        a.execute("INSERT INTO u (id) VALUES (1)").unwrap();
        b.execute("INSERT INTO u (id) VALUES (2)").unwrap();
        a.execute("COMMIT").unwrap();
        b.execute("COMMIT").unwrap();

        let result = db.execute("SELECT id FROM u").unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn rollback_restores_index_visibility() {
        let db = fresh_db();
        db.execute("CREATE TABLE u (id int, n int)").unwrap();
        db.execute("CREATE INDEX ix ON u(n)").unwrap();
        db.execute("INSERT INTO u (id, n) VALUES (1, 10)").unwrap();
        db.execute("INSERT INTO u (id, n) VALUES (2, 20)").unwrap();

        db.execute("BEGIN").unwrap();
        db.execute("UPDATE u SET n = 99 WHERE id = 1").unwrap();
        db.execute("ROLLBACK").unwrap();

        let still_ten = db.execute("SELECT id FROM u WHERE n = 10").unwrap();
        assert_eq!(still_ten.rows, vec![vec![Value::Int(1)]]);
        let gone = db.execute("SELECT id FROM u WHERE n = 99").unwrap();
        assert!(gone.rows.is_empty());
    }

    #[test]
    fn delete_then_select_returns_nothing() {
        let db = fresh_db();
        db.execute("CREATE TABLE u (id int)").unwrap();
        db.execute("INSERT INTO u (id) VALUES (1)").unwrap();
        db.execute("DELETE FROM u WHERE id = 1").unwrap();
        let result = db.execute("SELECT id FROM u").unwrap();
        assert!(result.rows.is_empty());
    }

    #[test]
    fn duplicate_embedding_dimension_rejected_in_strict_mode() {
        let db = fresh_db();
        let result = db.execute("CREATE TABLE docs (a embedding(4), b embedding(4))");
        assert!(matches!(result, Err(DatabaseError::DuplicateEmbeddingDimension(_))));
    }

    #[test]
    fn too_many_embeddings_rejected() {
        let db = fresh_db();
        db.set_config(DatabaseConfig {
            max_embeddings_per_row: 1,
            ..DatabaseConfig::default()
        });
        db.execute("CREATE TABLE docs (a embedding(2), b embedding(3))").unwrap();
        let result = db.execute("INSERT INTO docs (a, b) VALUES ([1.0, 2.0], [1.0, 2.0, 3.0])");
        assert!(matches!(result, Err(DatabaseError::TooManyEmbeddings { .. })));
    }

    #[test]
    fn commit_without_begin_errors() {
        let db = fresh_db();
        assert!(matches!(db.execute("COMMIT"), Err(DatabaseError::NoActiveTransaction)));
    }

    #[test]
    fn vacuum_runs_without_error() {
        let db = fresh_db();
        db.execute("CREATE TABLE u (id int)").unwrap();
        db.execute("INSERT INTO u (id) VALUES (1)").unwrap();
        db.execute("UPDATE u SET id = 2 WHERE id = 1").unwrap();
        let result = db.execute("VACUUM u").unwrap();
        assert_eq!(result.columns, vec!["message".to_string()]);
    }

    #[test]
    fn crash_recovery_preserves_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = fresh_db();
            db.enable_wal(dir.path()).unwrap();
            db.execute("CREATE TABLE u (id int)").unwrap();
            db.execute("INSERT INTO u (id) VALUES (1)").unwrap();
            db.execute("BEGIN").unwrap();
            db.execute("INSERT INTO u (id) VALUES (2)").unwrap();
            // No commit: simulates a crash with an in-progress transaction.
        }

        let db2 = fresh_db();
        db2.enable_wal(dir.path()).unwrap();
        let result = db2.execute("SELECT id FROM u").unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(1)]]);
    }
}
