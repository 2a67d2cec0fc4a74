use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::value::Value;
use crate::mvcc::{is_visible, CommitLog, Snapshot};

/// One version of one row. `next` is an arena index rather than a pointer
/// — chains are
/// newest-first, so `next` always points toward an older version or `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowVersion {
    pub row_id: u64,
    pub xmin: u64,
    pub xmax: u64,
    pub data: HashMap<String, Value>,
    pub next: Option<usize>,
}

impl RowVersion {
    pub fn is_visible_to(&self, snapshot: &Snapshot, clog: &CommitLog) -> bool {
        is_visible(self.xmin, self.xmax, snapshot, clog)
    }
}
