use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::core::error::{DatabaseError, DbResult};

use super::clog::CommitLog;
use super::snapshot::Snapshot;

/// Assigns monotonic transaction ids, takes snapshots of the active set, and
/// owns the commit log.
/// (atomic id counter + `RwLock<HashSet<u64>>` active set) by also holding
/// the CLOG so that visibility checks (`mvcc::snapshot::is_visible`) have a
/// single owner to borrow from.
pub struct TransactionManager {
    next_tx_id: AtomicU64,
    active: RwLock<HashSet<u64>>,
    clog: RwLock<CommitLog>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_tx_id: AtomicU64::new(1),
            active: RwLock::new(HashSet::new()),
            clog: RwLock::new(CommitLog::new()),
        }
    }

    /// Restores the id counter after WAL recovery so newly begun
    /// transactions never collide with replayed ids.
    pub fn fast_forward(&self, max_seen_tx_id: u64) {
        let mut current = self.next_tx_id.load(Ordering::SeqCst);
        while max_seen_tx_id + 1 > current {
            match self.next_tx_id.compare_exchange_weak(
                current,
                max_seen_tx_id + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Allocates the next id, captures the active set *before* publishing
    /// this id into it (the precondition calls out for
    /// `!wasActive(xmin)` to stand in for a true begin-point comparison),
    /// and marks the new id in-progress in the CLOG.
    pub fn begin(&self) -> (u64, Snapshot) {
        let tx_id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.write().expect("lock poisoned");
        let snapshot = Snapshot::new(tx_id, active.clone());
        active.insert(tx_id);
        drop(active);
        self.clog.write().expect("lock poisoned").set_in_progress(tx_id);
        (tx_id, snapshot)
    }

    pub fn commit(&self, tx_id: u64) -> DbResult<()> {
        let mut active = self.active.write().expect("lock poisoned");
        if !active.remove(&tx_id) {
            return Err(DatabaseError::NoActiveTransaction);
        }
        drop(active);
        self.clog.write().expect("lock poisoned").set_committed(tx_id);
        Ok(())
    }

    pub fn rollback(&self, tx_id: u64) -> DbResult<()> {
        let mut active = self.active.write().expect("lock poisoned");
        if !active.remove(&tx_id) {
            return Err(DatabaseError::NoActiveTransaction);
        }
        drop(active);
        self.clog.write().expect("lock poisoned").set_aborted(tx_id);
        Ok(())
    }

    pub fn current_snapshot(&self) -> Snapshot {
        let active = self.active.read().expect("lock poisoned");
        Snapshot::new(0, active.clone())
    }

    /// The oldest id that any present or future snapshot might still need
    /// to see; versions superseded before this id are safe to vacuum.
    pub fn oldest_active_tx(&self) -> u64 {
        let active = self.active.read().expect("lock poisoned");
        active
            .iter()
            .copied()
            .min()
            .unwrap_or_else(|| self.next_tx_id.load(Ordering::SeqCst).saturating_sub(1))
    }

    pub fn with_clog<R>(&self, f: impl FnOnce(&CommitLog) -> R) -> R {
        f(&self.clog.read().expect("lock poisoned"))
    }

    pub fn clog_mut(&self) -> std::sync::RwLockWriteGuard<'_, CommitLog> {
        self.clog.write().expect("lock poisoned")
    }

    pub fn set_committed(&self, tx_id: u64) {
        self.clog.write().expect("lock poisoned").set_committed(tx_id);
    }

    pub fn set_aborted(&self, tx_id: u64) {
        self.clog.write().expect("lock poisoned").set_aborted(tx_id);
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_zero() {
        let mgr = TransactionManager::new();
        let (a, _) = mgr.begin();
        let (b, _) = mgr.begin();
        assert!(a > 0 && b > a);
    }

    #[test]
    fn snapshot_captures_active_set_before_self() {
        let mgr = TransactionManager::new();
        let (t1, _) = mgr.begin();
        let (_t2, snap2) = mgr.begin();
        assert!(snap2.was_active(t1));
        assert!(!snap2.was_active(snap2.own_tx_id));
    }

    #[test]
    fn commit_without_begin_errors() {
        let mgr = TransactionManager::new();
        assert!(matches!(
            mgr.commit(999),
            Err(DatabaseError::NoActiveTransaction)
        ));
    }

    #[test]
    fn oldest_active_tx_tracks_minimum() {
        let mgr = TransactionManager::new();
        let (t1, _) = mgr.begin();
        let (t2, _) = mgr.begin();
        assert_eq!(mgr.oldest_active_tx(), t1);
        mgr.commit(t1).unwrap();
        assert_eq!(mgr.oldest_active_tx(), t2);
    }
}
