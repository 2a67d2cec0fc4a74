use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::error::{DatabaseError, DbResult};
use crate::core::value::Value;

use super::btree::BTreeIndex;

/// Owns every B-tree index in the database and dispatches the
/// insert/delete/update maintenance hooks, factored into its own object so
/// the DML path can call one hook per mutation instead of repeating the
/// "for each index on this column" loop at every call site.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IndexManager {
    indexes: HashMap<String, BTreeIndex>,
    // (table, column) -> index names, for fast "which indexes cover this column" lookup.
    by_column: HashMap<(String, String), Vec<String>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_index(
        &mut self,
        name: &str,
        table: &str,
        column: &str,
        is_unique: bool,
    ) -> DbResult<()> {
        if self.indexes.contains_key(name) {
            return Err(DatabaseError::ValidationFailed(format!(
                "index {name} already exists"
            )));
        }
        self.indexes
            .insert(name.to_string(), BTreeIndex::new(name, table, column, is_unique));
        self.by_column
            .entry((table.to_string(), column.to_string()))
            .or_default()
            .push(name.to_string());
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> DbResult<()> {
        let idx = self
            .indexes
            .remove(name)
            .ok_or_else(|| DatabaseError::ValidationFailed(format!("index {name} not found")))?;
        if let Some(names) = self.by_column.get_mut(&(idx.table.clone(), idx.column.clone())) {
            names.retain(|n| n != name);
        }
        Ok(())
    }

    pub fn index(&self, name: &str) -> Option<&BTreeIndex> {
        self.indexes.get(name)
    }

    pub fn index_mut(&mut self, name: &str) -> Option<&mut BTreeIndex> {
        self.indexes.get_mut(name)
    }

    pub fn index_names_for_table(&self, table: &str) -> Vec<String> {
        self.indexes
            .values()
            .filter(|i| i.table == table)
            .map(|i| i.name.clone())
            .collect()
    }

    pub fn indexes_on(&self, table: &str, column: &str) -> Vec<&BTreeIndex> {
        self.by_column
            .get(&(table.to_string(), column.to_string()))
            .map(|names| names.iter().filter_map(|n| self.indexes.get(n)).collect())
            .unwrap_or_default()
    }

    pub fn indexes_for_table(&self, table: &str) -> Vec<&BTreeIndex> {
        self.indexes.values().filter(|i| i.table == table).collect()
    }

    pub fn all_indexes(&self) -> impl Iterator<Item = &BTreeIndex> {
        self.indexes.values()
    }

    /// Installs a fully-built `BTreeIndex` (e.g. one just deserialized by
    /// `persistence::load_all`), wiring up `by_column` the same way
    /// `create_index` would.
    pub fn install(&mut self, index: BTreeIndex) {
        self.by_column
            .entry((index.table.clone(), index.column.clone()))
            .or_default()
            .push(index.name.clone());
        self.indexes.insert(index.name.clone(), index);
    }

    pub fn drop_table_indexes(&mut self, table: &str) {
        let names: Vec<String> = self
            .indexes
            .values()
            .filter(|i| i.table == table)
            .map(|i| i.name.clone())
            .collect();
        for n in names {
            let _ = self.drop_index(&n);
        }
    }

    pub fn on_insert(&mut self, table: &str, row_id: u64, row: &HashMap<String, Value>) {
        let columns: HashSet<String> = self
            .by_column
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, c)| c.clone())
            .collect();
        for column in columns {
            if let Some(value) = row.get(&column) {
                for name in self.by_column[&(table.to_string(), column.clone())].clone() {
                    if let Some(idx) = self.indexes.get_mut(&name) {
                        idx.insert(value, row_id);
                    }
                }
            }
        }
    }

    pub fn on_delete(&mut self, table: &str, row_id: u64, row: &HashMap<String, Value>) {
        let columns: HashSet<String> = self
            .by_column
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, c)| c.clone())
            .collect();
        for column in columns {
            if let Some(value) = row.get(&column) {
                for name in self.by_column[&(table.to_string(), column.clone())].clone() {
                    if let Some(idx) = self.indexes.get_mut(&name) {
                        idx.remove(value, row_id);
                    }
                }
            }
        }
    }

    pub fn on_update(
        &mut self,
        table: &str,
        row_id: u64,
        old_row: &HashMap<String, Value>,
        new_row: &HashMap<String, Value>,
    ) {
        let columns: HashSet<String> = self
            .by_column
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, c)| c.clone())
            .collect();
        for column in columns {
            let old_val = old_row.get(&column);
            let new_val = new_row.get(&column);
            if old_val == new_val {
                continue;
            }
            let names = self.by_column[&(table.to_string(), column.clone())].clone();
            for name in names {
                if let Some(idx) = self.indexes.get_mut(&name) {
                    if let Some(v) = old_val {
                        idx.remove(v, row_id);
                    }
                    if let Some(v) = new_val {
                        idx.insert(v, row_id);
                    }
                }
            }
        }
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
    fn on_insert_and_search() {
        let mut mgr = IndexManager::new();
        mgr.create_index("ix_n", "u", "n", false).unwrap();
        mgr.on_insert("u", 1, &row(10));
        let idx = mgr.index("ix_n").unwrap();
        assert!(idx.contains(&Value::Int(10), 1));
    }

    #[test]
    fn on_update_moves_entry() {
        let mut mgr = IndexManager::new();
        mgr.create_index("ix_n", "u", "n", false).unwrap();
        mgr.on_insert("u", 1, &row(10));
        mgr.on_update("u", 1, &row(10), &row(99));
        let idx = mgr.index("ix_n").unwrap();
        assert!(!idx.contains(&Value::Int(10), 1));
        assert!(idx.contains(&Value::Int(99), 1));
    }

    #[test]
    fn rollback_reinserts_old_value() {
        let mut mgr = IndexManager::new();
        mgr.create_index("ix_n", "u", "n", false).unwrap();
        mgr.on_insert("u", 1, &row(10));
        mgr.on_update("u", 1, &row(10), &row(99));
        // Simulate rollback: restore old, remove new.
        mgr.on_update("u", 1, &row(99), &row(10));
        let idx = mgr.index("ix_n").unwrap();
        assert!(idx.contains(&Value::Int(10), 1));
        assert!(!idx.contains(&Value::Int(99), 1));
    }
}
