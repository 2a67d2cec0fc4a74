use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::column::Column;
use crate::core::error::{DatabaseError, DbResult};
use crate::core::value::Value;
use crate::mvcc::{CommitLog, Snapshot, TxStatus};

use super::version_chain::RowVersion;

#[derive(Debug, Default, Clone, Copy)]
pub struct VacuumStats {
    pub versions_removed: usize,
    pub chains_scanned: usize,
    pub longest_chain: usize,
    pub total_versions: usize,
}

/// Schema + versioned heap for one table. The arena holds every `RowVersion`
/// ever created (tombstoned to `None` by vacuum/physical delete); `heads`
/// maps a live row-id to the arena index of its newest version. Row-ids are
/// never reused, enforced by a strictly-monotonic atomic counter.
#[derive(Debug, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    next_row_id: AtomicU64,
    arena: Vec<Option<RowVersion>>,
    heads: HashMap<u64, usize>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            next_row_id: AtomicU64::new(1),
            arena: Vec::new(),
            heads: HashMap::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn reserve_row_id(&self) -> u64 {
        self.next_row_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Restores the row-id counter during WAL recovery so freshly inserted
    /// rows never collide with replayed ones.
    pub fn fast_forward_row_id(&self, max_seen: u64) {
        let mut current = self.next_row_id.load(Ordering::SeqCst);
        while max_seen + 1 > current {
            match self.next_row_id.compare_exchange_weak(
                current,
                max_seen + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn insert_with_id(
        &mut self,
        row_id: u64,
        values: HashMap<String, Value>,
        tx_id: u64,
    ) -> DbResult<()> {
        if self.heads.contains_key(&row_id) {
            return Err(DatabaseError::DuplicateRowId(row_id));
        }
        let idx = self.arena.len();
        self.arena.push(Some(RowVersion {
            row_id,
            xmin: tx_id,
            xmax: 0,
            data: values,
            next: None,
        }));
        self.heads.insert(row_id, idx);
        Ok(())
    }

    fn head_idx(&self, row_id: u64) -> Option<usize> {
        self.heads.get(&row_id).copied()
    }

    pub fn head_version(&self, row_id: u64) -> Option<&RowVersion> {
        self.head_idx(row_id).and_then(|idx| self.arena[idx].as_ref())
    }

    pub fn update(
        &mut self,
        row_id: u64,
        column: &str,
        value: Value,
        tx_id: u64,
        clog: &CommitLog,
    ) -> DbResult<()> {
        let head_idx = self.head_idx(row_id).ok_or(DatabaseError::RowNotFound(row_id))?;
        let head = self.arena[head_idx]
            .as_ref()
            .ok_or(DatabaseError::RowNotFound(row_id))?;
        if head.xmax != 0 && clog.status(head.xmax) == TxStatus::Committed {
            return Err(DatabaseError::RowNotFound(row_id));
        }
        let mut new_data = head.data.clone();
        new_data.insert(column.to_string(), value);

        self.arena[head_idx].as_mut().unwrap().xmax = tx_id;
        let new_idx = self.arena.len();
        self.arena.push(Some(RowVersion {
            row_id,
            xmin: tx_id,
            xmax: 0,
            data: new_data,
            next: Some(head_idx),
        }));
        self.heads.insert(row_id, new_idx);
        Ok(())
    }

    /// Replaces a row's current data in place without growing the version
    /// chain or touching `xmin`/`xmax`. Used only by WAL replay, which
    /// reconstructs each row as a single version with `xmin = 0`: there is
    /// no prior snapshot left to preserve a pre-image for, so the update
    /// that would otherwise supersede the head is instead folded into it
    /// directly, avoiding a dead version whose `xmax` would need a
    /// transaction id the post-recovery CLOG no longer remembers.
    pub fn replay_overwrite(&mut self, row_id: u64, new_data: HashMap<String, Value>) -> DbResult<()> {
        let head_idx = self.head_idx(row_id).ok_or(DatabaseError::RowNotFound(row_id))?;
        let head = self.arena[head_idx].as_mut().ok_or(DatabaseError::RowNotFound(row_id))?;
        head.data = new_data;
        Ok(())
    }

    pub fn delete(&mut self, row_id: u64, tx_id: u64, clog: &CommitLog) -> DbResult<()> {
        let head_idx = self.head_idx(row_id).ok_or(DatabaseError::RowNotFound(row_id))?;
        let head = self.arena[head_idx]
            .as_mut()
            .ok_or(DatabaseError::RowNotFound(row_id))?;
        if head.xmax != 0 && clog.status(head.xmax) == TxStatus::Committed {
            return Err(DatabaseError::RowNotFound(row_id));
        }
        head.xmax = tx_id;
        Ok(())
    }

    /// Unconditional removal of an entire chain, used to undo an INSERT
    /// before any transaction state becomes visible (rollback of a new row,
    /// or a failed index/ANN update immediately after insert). Never called
    /// on committed data.
    pub fn physical_delete(&mut self, row_id: u64) {
        let Some(mut idx) = self.heads.remove(&row_id) else {
            return;
        };
        loop {
            let next = self.arena[idx].as_ref().and_then(|v| v.next);
            self.arena[idx] = None;
            match next {
                Some(n) => idx = n,
                None => break,
            }
        }
    }

    pub fn get_visible(&self, row_id: u64, snapshot: &Snapshot, clog: &CommitLog) -> Option<&RowVersion> {
        let mut idx = self.head_idx(row_id)?;
        loop {
            let version = self.arena[idx].as_ref()?;
            if version.is_visible_to(snapshot, clog) {
                return Some(version);
            }
            match version.next {
                Some(n) => idx = n,
                None => return None,
            }
        }
    }

    pub fn all_row_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.heads.keys().copied()
    }

    pub fn get_all_rows(&self, snapshot: &Snapshot, clog: &CommitLog) -> Vec<&RowVersion> {
        self.heads
            .keys()
            .filter_map(|&row_id| self.get_visible(row_id, snapshot, clog))
            .collect()
    }

    /// Prunes any version whose xmax is committed and less than
    /// `min_visible_tx_id` — no present or future snapshot can still need
    /// it. Chain heads are never pruned even if dead (their row-id slot
    /// would otherwise dangle); `physical_delete` handles full removal.
    pub fn vacuum(&mut self, min_visible_tx_id: u64, clog: &CommitLog) -> VacuumStats {
        let mut stats = VacuumStats::default();
        let row_ids: Vec<u64> = self.heads.keys().copied().collect();
        for row_id in row_ids {
            stats.chains_scanned += 1;
            let mut chain_len = 0usize;
            let mut prev_idx: Option<usize> = None;
            let mut idx_opt = self.head_idx(row_id);
            while let Some(idx) = idx_opt {
                chain_len += 1;
                stats.total_versions += 1;
                let (next, should_prune) = {
                    let v = match self.arena[idx].as_ref() {
                        Some(v) => v,
                        None => break,
                    };
                    let should_prune = v.xmax != 0
                        && clog.status(v.xmax) == TxStatus::Committed
                        && v.xmax < min_visible_tx_id;
                    (v.next, should_prune)
                };
                if should_prune {
                    // Splice this version out of the chain.
                    if let Some(p) = prev_idx {
                        if let Some(pv) = self.arena[p].as_mut() {
                            pv.next = next;
                        }
                    } else {
                        match next {
                            Some(n) => {
                                self.heads.insert(row_id, n);
                            }
                            None => {
                                self.heads.remove(&row_id);
                            }
                        }
                    }
                    self.arena[idx] = None;
                    stats.versions_removed += 1;
                    idx_opt = next;
                    continue;
                }
                prev_idx = Some(idx);
                idx_opt = next;
            }
            stats.longest_chain = stats.longest_chain.max(chain_len);
        }
        stats
    }

    pub fn row_count(&self) -> usize {
        self.heads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(n: i64) -> HashMap<String, Value> {
        let mut m = HashMap::new();
        m.insert("n".to_string(), Value::Int(n));
        m
    }

    #[test]
    fn insert_then_get_visible() {
        let mut t = Table::new("u", vec![Column::new("n", crate::core::DataType::Int)]);
        let clog = CommitLog::new();
        let id = t.reserve_row_id();
        t.insert_with_id(id, row(10), 1).unwrap();
        let snap = Snapshot::new(1, Default::default());
        let v = t.get_visible(id, &snap, &clog).unwrap();
        assert_eq!(v.data.get("n"), Some(&Value::Int(10)));
    }

    #[test]
    fn duplicate_row_id_rejected() {
        let mut t = Table::new("u", vec![]);
        t.insert_with_id(1, row(1), 1).unwrap();
        assert!(matches!(
            t.insert_with_id(1, row(2), 1),
            Err(DatabaseError::DuplicateRowId(1))
        ));
    }

    #[test]
    fn update_prepends_new_version() {
        let mut t = Table::new("u", vec![]);
        let mut clog = CommitLog::new();
        t.insert_with_id(1, row(10), 1).unwrap();
        clog.set_committed(1);
        t.update(1, "n", Value::Int(20), 2, &clog).unwrap();
        clog.set_committed(2);
        let snap = Snapshot::new(3, Default::default());
        let v = t.get_visible(1, &snap, &clog).unwrap();
        assert_eq!(v.data.get("n"), Some(&Value::Int(20)));
    }

    #[test]
    fn vacuum_removes_dead_versions_only() {
        let mut t = Table::new("u", vec![]);
        let mut clog = CommitLog::new();
        t.insert_with_id(1, row(10), 1).unwrap();
        clog.set_committed(1);
        t.update(1, "n", Value::Int(20), 2, &clog).unwrap();
        clog.set_committed(2);
        let stats = t.vacuum(10, &clog);
        assert_eq!(stats.versions_removed, 1);
        let snap = Snapshot::new(99, Default::default());
        assert_eq!(
            t.get_visible(1, &snap, &clog).unwrap().data.get("n"),
            Some(&Value::Int(20))
        );
    }
}
