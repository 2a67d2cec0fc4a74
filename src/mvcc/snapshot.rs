use std::collections::HashSet;

use super::clog::{CommitLog, TxStatus};

/// Captured at transaction begin: the transaction's own id plus the set of
/// tx ids that were active (begun, not yet committed/aborted) at that
/// moment. A snapshot never contains its own id.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub own_tx_id: u64,
    active_at_begin: HashSet<u64>,
}

impl Snapshot {
    pub fn new(own_tx_id: u64, active_at_begin: HashSet<u64>) -> Self {
        Self {
            own_tx_id,
            active_at_begin,
        }
    }

    /// The "auto-commit" snapshot used for reads with no explicit
    /// transaction: own id 0, nothing recorded as concurrently active.
    pub fn auto_commit() -> Self {
        Self {
            own_tx_id: 0,
            active_at_begin: HashSet::new(),
        }
    }

    pub fn was_active(&self, tx_id: u64) -> bool {
        self.active_at_begin.contains(&tx_id)
    }
}

/// Implements the three-clause visibility rule directly.
pub fn is_visible(xmin: u64, xmax: u64, snapshot: &Snapshot, clog: &CommitLog) -> bool {
    let clause1_or_2 = xmin == snapshot.own_tx_id
        || (xmin < snapshot.own_tx_id
            && clog.status(xmin) == TxStatus::Committed
            && !snapshot.was_active(xmin));
    if !clause1_or_2 {
        return false;
    }

    if xmax == 0 {
        return true;
    }
    if xmax == snapshot.own_tx_id {
        return false;
    }
    if clog.status(xmax) != TxStatus::Committed {
        return true;
    }
    if snapshot.was_active(xmax) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clog_with(committed: &[u64], aborted: &[u64]) -> CommitLog {
        let mut c = CommitLog::new();
        for &t in committed {
            c.set_committed(t);
        }
        for &t in aborted {
            c.set_aborted(t);
        }
        c
    }

    #[test]
    fn sees_own_uncommitted_write() {
        let snap = Snapshot::new(5, HashSet::new());
        let clog = CommitLog::new();
        assert!(is_visible(5, 0, &snap, &clog));
    }

    #[test]
    fn does_not_see_concurrent_writer() {
        let mut active = HashSet::new();
        active.insert(3);
        let snap = Snapshot::new(5, active);
        let clog = clog_with(&[3], &[]);
        // xmin=3 committed but was active at our begin -> invisible.
        assert!(!is_visible(3, 0, &snap, &clog));
    }

    #[test]
    fn sees_write_committed_before_snapshot() {
        let snap = Snapshot::new(5, HashSet::new());
        let clog = clog_with(&[2], &[]);
        assert!(is_visible(2, 0, &snap, &clog));
    }

    #[test]
    fn own_delete_makes_row_invisible() {
        let snap = Snapshot::new(5, HashSet::new());
        let clog = CommitLog::new();
        assert!(!is_visible(1, 5, &snap, &clog));
    }

    #[test]
    fn concurrent_deleter_does_not_hide_row() {
        let mut active = HashSet::new();
        active.insert(4);
        let snap = Snapshot::new(5, active.clone());
        let clog = clog_with(&[1], &[]);
        // xmax=4 was active at our begin -> its delete is invisible to us.
        assert!(is_visible(1, 4, &snap, &clog));
    }

    #[test]
    fn committed_noncurrent_deleter_hides_row() {
        let snap = Snapshot::new(5, HashSet::new());
        let clog = clog_with(&[1, 4], &[]);
        assert!(!is_visible(1, 4, &snap, &clog));
    }

    #[test]
    fn aborted_deleter_does_not_hide_row() {
        let snap = Snapshot::new(5, HashSet::new());
        let clog = clog_with(&[1], &[4]);
        assert!(is_visible(1, 4, &snap, &clog));
    }

    #[test]
    fn does_not_see_write_from_tx_begun_after_snapshot() {
        // Our snapshot began as tx 5; tx 9 starts later, writes, and commits.
        // It never appears in active_at_begin because it did not exist yet,
        // so the commit check alone is not enough to exclude it.
        let snap = Snapshot::new(5, HashSet::new());
        let clog = clog_with(&[9], &[]);
        assert!(!is_visible(9, 0, &snap, &clog));
    }
}
