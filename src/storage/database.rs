use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::column::Column;
use crate::core::error::{DatabaseError, DbResult};

use super::table::Table;

/// The versioned-heap half of the engine: just schema + row storage, no
/// transaction or index state. Indexes, the ANN graph, and the transaction
/// manager live one layer up in `crate::database::Database`, which is the
/// object the public API and the executor actually talk to.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Storage {
    tables: HashMap<String, Table>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> DbResult<()> {
        if self.tables.contains_key(name) {
            return Err(DatabaseError::TableAlreadyExists(name.to_string()));
        }
        for col in &columns {
            col.validate()?;
        }
        self.tables.insert(name.to_string(), Table::new(name, columns));
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> DbResult<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| DatabaseError::TableNotFound(name.to_string()))
    }

    pub fn table(&self, name: &str) -> DbResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DatabaseError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> DbResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DatabaseError::TableNotFound(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn rename_table(&mut self, old: &str, new: &str) -> DbResult<()> {
        if !self.tables.contains_key(old) {
            return Err(DatabaseError::TableNotFound(old.to_string()));
        }
        if self.tables.contains_key(new) {
            return Err(DatabaseError::TableAlreadyExists(new.to_string()));
        }
        let mut table = self.tables.remove(old).unwrap();
        table.name = new.to_string();
        self.tables.insert(new.to_string(), table);
        Ok(())
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn tables_mut(&mut self) -> impl Iterator<Item = &mut Table> {
        self.tables.values_mut()
    }
}
