use thiserror::Error;

/// Every recoverable failure the engine can surface, from `execute` down to the
/// storage and WAL layers. Carries a context string wherever one is useful
/// so callers get a meaningful message without a separate formatting pass.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("duplicate embedding dimension column in table {0}")]
    DuplicateEmbeddingDimension(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("invalid syntax: {0}")]
    InvalidSyntax(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("row not found: {0}")]
    RowNotFound(u64),
    #[error("duplicate row id: {0}")]
    DuplicateRowId(u64),
    #[error("too many embeddings on row (max {max}, got {got})")]
    TooManyEmbeddings { max: usize, got: usize },

    #[error("no active transaction")]
    NoActiveTransaction,
    #[error("subquery returned more than one row")]
    SubqueryReturnedMultipleRows,
    #[error("invalid subquery: {0}")]
    InvalidSubquery(String),
    #[error("HAVING used without GROUP BY")]
    HavingWithoutGroupBy,
    #[error("column {0} is not in GROUP BY")]
    ColumnNotInGroupBy(String),
    #[error("SELECT * cannot be combined with GROUP BY")]
    CannotUseStarWithGroupBy,

    #[error("WAL write failed: {0}")]
    WalWriteFailed(String),
    #[error("WAL corrupt: {0}")]
    WalCorrupt(String),
    #[error("persistence load failed: {0}")]
    PersistenceLoadFailed(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type DbResult<T> = Result<T, DatabaseError>;
