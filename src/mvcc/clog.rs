use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Status of a transaction id, as recorded in the commit log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxStatus {
    InProgress,
    Committed,
    Aborted,
}

/// Maps transaction id to status. Unknown ids default to `InProgress`
/// (defensive — a version whose creator we've never heard of must not be
/// treated as visible). Entries are retained indefinitely; CLOG truncation
/// is left for a future version.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CommitLog {
    statuses: HashMap<u64, TxStatus>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, tx_id: u64) -> TxStatus {
        if tx_id == 0 {
            // Bootstrap / recovery-applied writes are unconditionally visible.
            return TxStatus::Committed;
        }
        self.statuses
            .get(&tx_id)
            .copied()
            .unwrap_or(TxStatus::InProgress)
    }

    pub fn set_in_progress(&mut self, tx_id: u64) {
        self.statuses.insert(tx_id, TxStatus::InProgress);
    }

    pub fn set_committed(&mut self, tx_id: u64) {
        self.statuses.insert(tx_id, TxStatus::Committed);
    }

    pub fn set_aborted(&mut self, tx_id: u64) {
        self.statuses.insert(tx_id, TxStatus::Aborted);
    }

    pub fn is_committed(&self, tx_id: u64) -> bool {
        self.status(tx_id) == TxStatus::Committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tx_defaults_to_in_progress() {
        let clog = CommitLog::new();
        assert_eq!(clog.status(42), TxStatus::InProgress);
    }

    #[test]
    fn tx_zero_is_always_committed() {
        let clog = CommitLog::new();
        assert_eq!(clog.status(0), TxStatus::Committed);
    }

    #[test]
    fn transitions_are_tracked() {
        let mut clog = CommitLog::new();
        clog.set_in_progress(1);
        assert_eq!(clog.status(1), TxStatus::InProgress);
        clog.set_committed(1);
        assert!(clog.is_committed(1));
        clog.set_aborted(2);
        assert_eq!(clog.status(2), TxStatus::Aborted);
    }
}
