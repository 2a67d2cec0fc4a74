use std::collections::HashMap;

use crate::core::Value;
use crate::storage::Table;

/// One output row flowing through the scan/filter/join/aggregate pipeline.
/// Fields are qualified `table.column` internally so a join can combine two
/// tuples without a name collision; `get` also accepts a bare column name
/// and resolves it against whichever field's qualified name ends in
/// `.column`, which is how single-table queries and WHERE clauses that
/// don't bother qualifying their columns keep working.
#[derive(Debug, Clone, Default)]
pub struct Tuple {
    pub row_id: u64,
    fields: Vec<(String, Value)>,
}

impl Tuple {
    pub fn new(row_id: u64) -> Self {
        Self {
            row_id,
            fields: Vec::new(),
        }
    }

    /// Builds a tuple for one table's row, qualifying every field as
    /// `table.column` and ordering fields by the table's schema so
    /// `SELECT *` projects in a stable, predictable order.
    pub fn from_row(table: &Table, row_id: u64, data: &HashMap<String, Value>) -> Self {
        let fields = table
            .columns
            .iter()
            .map(|c| {
                let value = data.get(&c.name).cloned().unwrap_or(Value::Null);
                (format!("{}.{}", table.name, c.name), value)
            })
            .collect();
        Self { row_id, fields }
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn push(&mut self, qualified_name: impl Into<String>, value: Value) {
        self.fields.push((qualified_name.into(), value));
    }

    /// Concatenates `other`'s fields onto `self`, used to build the
    /// intermediate row of a join.
    pub fn extend(&mut self, other: &Tuple) {
        self.fields.extend(other.fields.iter().cloned());
    }

    pub fn with_extra(&self, name: impl Into<String>, value: Value) -> Tuple {
        let mut t = self.clone();
        t.push(name, value);
        t
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some((_, v)) = self.fields.iter().find(|(n, _)| n == name) {
            return Some(v);
        }
        let suffix = format!(".{name}");
        self.fields.iter().find(|(n, _)| n.ends_with(&suffix)).map(|(_, v)| v)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }
}
