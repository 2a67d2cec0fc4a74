use serde::{Deserialize, Serialize};

/// Governs whether a statement that the (separately-shipped) semantic
/// validator flags is rejected, logged, or silently allowed through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationMode {
    Strict,
    Warnings,
    Disabled,
}

impl Default for ValidationMode {
    fn default() -> Self {
        ValidationMode::Strict
    }
}

/// Plain `Default`-backed config struct rather than a builder crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub validation_mode: ValidationMode,
    /// Resource-exhaustion guard on embedding columns per row.
    pub max_embeddings_per_row: usize,
    /// Whether `Database::close` calls `save_all` when persistence is on.
    pub autosave: bool,
    /// WAL file rotation threshold in bytes.
    pub wal_max_file_size: u64,
    /// Opportunistic-vacuum watermark: auto-commit statements touching a
    /// table trigger a vacuum sweep of that table every N such statements
    ///.
    pub auto_vacuum_every: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            validation_mode: ValidationMode::Strict,
            max_embeddings_per_row: 16,
            autosave: false,
            wal_max_file_size: 16 * 1024 * 1024,
            auto_vacuum_every: 512,
        }
    }
}

/// ANN build/search knobs, set once via `Database::init_vector_search`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VectorSearchConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
        }
    }
}
