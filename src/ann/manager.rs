use std::collections::HashMap;

use super::graph::HnswGraph;
use crate::config::VectorSearchConfig;
use crate::core::{DatabaseError, DbResult};

/// Owns one `HnswGraph` per (table, embedding column) pair.
///
/// "One index per embedding dimension" with row-ids "unique per
/// dimension-table pair" read literally: two tables that happen to share a
/// dimension would otherwise collide in one graph's row-id space, since a
/// row-id is only unique within its own table. Keying by `(table, column)`
/// instead of bare dimension avoids that collision while still giving
/// exactly one graph per embedding column, the overwhelmingly common case
/// of one embedding column per table. Recorded as a design decision in
/// DESIGN.md.
#[derive(Debug, Default)]
pub struct AnnIndexManager {
    config: VectorSearchConfig,
    graphs: HashMap<(String, String), HnswGraph>,
}

impl AnnIndexManager {
    pub fn new(config: VectorSearchConfig) -> Self {
        Self {
            config,
            graphs: HashMap::new(),
        }
    }

    pub fn configure(&mut self, config: VectorSearchConfig) {
        self.config = config;
    }

    fn key(table: &str, column: &str) -> (String, String) {
        (table.to_string(), column.to_string())
    }

    fn graph_mut(&mut self, table: &str, column: &str, dim: usize) -> &mut HnswGraph {
        self.graphs
            .entry(Self::key(table, column))
            .or_insert_with(|| HnswGraph::new(dim, self.config))
    }

    pub fn graph(&self, table: &str, column: &str) -> Option<&HnswGraph> {
        self.graphs.get(&Self::key(table, column))
    }

    pub fn insert(&mut self, table: &str, column: &str, row_id: u64, vector: &[f32]) {
        let dim = vector.len();
        self.graph_mut(table, column, dim).insert(row_id, vector.to_vec());
    }

    pub fn remove(&mut self, table: &str, column: &str, row_id: u64) {
        if let Some(g) = self.graphs.get_mut(&Self::key(table, column)) {
            g.remove(row_id);
        }
    }

    pub fn search(&self, table: &str, column: &str, query: &[f32], k: usize) -> DbResult<Vec<(u64, f32)>> {
        let graph = self
            .graphs
            .get(&Self::key(table, column))
            .ok_or_else(|| DatabaseError::ColumnNotFound(column.to_string()))?;
        if graph.dimension != query.len() {
            return Err(DatabaseError::TypeMismatch(format!(
                "query embedding has {} dims, index on {table}.{column} has {}",
                query.len(),
                graph.dimension
            )));
        }
        Ok(graph.search(query, k))
    }

    pub fn drop_table(&mut self, table: &str) {
        self.graphs.retain(|(t, _), _| t != table);
    }

    pub fn drop_column(&mut self, table: &str, column: &str) {
        self.graphs.remove(&Self::key(table, column));
    }

    /// Replaces whatever graph exists for `(table, column)` with a fresh one
    /// built from `rows` — used after WAL replay, since the WAL logs row
    /// data, not index state.
    pub fn rebuild(&mut self, table: &str, column: &str, dim: usize, rows: impl Iterator<Item = (u64, Vec<f32>)>) {
        let mut graph = HnswGraph::new(dim, self.config);
        for (row_id, vector) in rows {
            graph.insert(row_id, vector);
        }
        self.graphs.insert(Self::key(table, column), graph);
    }

    /// Every `(table, column)` graph's dimension and live vectors, for
    /// `save_all` — the graph's internal node/edge structure is never
    /// serialized, only enough to `rebuild` it on load.
    pub fn all_graphs(&self) -> impl Iterator<Item = (&str, &str, usize, Vec<(u64, Vec<f32>)>)> {
        self.graphs
            .iter()
            .map(|((table, column), graph)| (table.as_str(), column.as_str(), graph.dimension, graph.live_vectors()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_search_roundtrip() {
        let mut mgr = AnnIndexManager::new(VectorSearchConfig {
            m: 8,
            ef_construction: 32,
            ef_search: 16,
        });
        for i in 0..20u64 {
            mgr.insert("docs", "emb", i, &[i as f32, 0.0, 0.0]);
        }
        let results = mgr.search("docs", "emb", &[5.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, 5);
    }

    #[test]
    fn separate_tables_do_not_share_a_graph() {
        let mut mgr = AnnIndexManager::new(VectorSearchConfig {
            m: 8,
            ef_construction: 32,
            ef_search: 16,
        });
        mgr.insert("a", "emb", 1, &[1.0, 0.0]);
        mgr.insert("b", "emb", 1, &[0.0, 1.0]);
        assert_eq!(mgr.graph("a", "emb").unwrap().len(), 1);
        assert_eq!(mgr.graph("b", "emb").unwrap().len(), 1);
    }
}
