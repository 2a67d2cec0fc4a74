use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::value::Value;

/// Sorted map `Value -> ordered set of row-ids`, keyed by `Value::sort_key`
/// (a byte-level total order, so negative integers and floats sort
/// correctly). `range` supports the open/closed bound combinations the
/// planner needs for `<`/`<=`/`>`/`>=`/BETWEEN scans.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BTreeIndex {
    pub name: String,
    pub table: String,
    pub column: String,
    pub is_unique: bool,
    tree: BTreeMap<Vec<u8>, BTreeSet<u64>>,
}

impl BTreeIndex {
    pub fn new(name: impl Into<String>, table: impl Into<String>, column: impl Into<String>, is_unique: bool) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            column: column.into(),
            is_unique,
            tree: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, value: &Value, row_id: u64) {
        self.tree.entry(value.sort_key()).or_default().insert(row_id);
    }

    pub fn remove(&mut self, value: &Value, row_id: u64) {
        if let Some(set) = self.tree.get_mut(&value.sort_key()) {
            set.remove(&row_id);
            if set.is_empty() {
                self.tree.remove(&value.sort_key());
            }
        }
    }

    pub fn search(&self, value: &Value) -> BTreeSet<u64> {
        self.tree.get(&value.sort_key()).cloned().unwrap_or_default()
    }

    pub fn contains(&self, value: &Value, row_id: u64) -> bool {
        self.tree
            .get(&value.sort_key())
            .map(|s| s.contains(&row_id))
            .unwrap_or(false)
    }

    /// Range scan over `[min, max]`, honoring inclusive/exclusive bounds
    /// independently. `None` on either side means unbounded on that side.
    pub fn range(
        &self,
        min: Option<&Value>,
        min_inclusive: bool,
        max: Option<&Value>,
        max_inclusive: bool,
    ) -> BTreeSet<u64> {
        use std::ops::Bound;

        let lower = match min {
            None => Bound::Unbounded,
            Some(v) if min_inclusive => Bound::Included(v.sort_key()),
            Some(v) => Bound::Excluded(v.sort_key()),
        };
        let upper = match max {
            None => Bound::Unbounded,
            Some(v) if max_inclusive => Bound::Included(v.sort_key()),
            Some(v) => Bound::Excluded(v.sort_key()),
        };

        let mut out = BTreeSet::new();
        for (_, ids) in self.tree.range((lower, upper)) {
            out.extend(ids.iter().copied());
        }
        out
    }

    pub fn key_count(&self) -> usize {
        self.tree.len()
    }

    pub fn entry_count(&self) -> usize {
        self.tree.values().map(|s| s.len()).sum()
    }

    pub fn clear(&mut self) {
        self.tree.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_search() {
        let mut idx = BTreeIndex::new("ix", "t", "n", false);
        idx.insert(&Value::Int(10), 1);
        idx.insert(&Value::Int(10), 2);
        idx.insert(&Value::Int(20), 3);
        assert_eq!(idx.search(&Value::Int(10)).len(), 2);
        assert_eq!(idx.search(&Value::Int(20)).len(), 1);
    }

    #[test]
    fn remove_drops_empty_key() {
        let mut idx = BTreeIndex::new("ix", "t", "n", false);
        idx.insert(&Value::Int(10), 1);
        idx.remove(&Value::Int(10), 1);
        assert_eq!(idx.key_count(), 0);
    }

    #[test]
    fn range_handles_negative_ints() {
        let mut idx = BTreeIndex::new("ix", "t", "n", false);
        for n in [-10, -1, 0, 1, 10] {
            idx.insert(&Value::Int(n), n as u64 + 100);
        }
        let ids = idx.range(Some(&Value::Int(-5)), true, Some(&Value::Int(5)), true);
        assert_eq!(ids.len(), 3); // -1, 0, 1
    }

    #[test]
    fn range_exclusive_bounds() {
        let mut idx = BTreeIndex::new("ix", "t", "n", false);
        for n in 0..5 {
            idx.insert(&Value::Int(n), n as u64);
        }
        let ids = idx.range(Some(&Value::Int(1)), false, Some(&Value::Int(4)), false);
        assert_eq!(ids, BTreeSet::from([2, 3]));
    }
}
