use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use super::distance::cosine_distance;
use crate::config::VectorSearchConfig;

/// One entry in a beam: distance to the query plus the internal node id,
/// tie-broken by node id so beam contents (and therefore search results)
/// are deterministic across runs on identical data.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    node: usize,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.node.cmp(&other.node))
    }
}

#[derive(Debug, Clone)]
struct Node {
    row_id: u64,
    vector: Vec<f32>,
    /// Neighbor ids per layer, `neighbors[layer]`. `BTreeSet` for
    /// deterministic iteration and cheap degree-cap checks.
    neighbors: Vec<BTreeSet<usize>>,
    deleted: bool,
}

/// One hierarchical proximity graph, scoped to a single embedding
/// dimension (one index per embedding dimension encountered). Uses an
/// arena-of-nodes shape with splitmix64-seeded deterministic level
/// assignment and max-heap/min-heap beam search, distance-ordered (not
/// similarity-ordered) with a diversity-preferring neighbor-selection
/// heuristic instead of "take the M closest".
#[derive(Debug)]
pub struct HnswGraph {
    pub dimension: usize,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    nodes: Vec<Node>,
    row_id_to_node: HashMap<u64, usize>,
    entry_point: Option<usize>,
    max_level: usize,
    rng_seed: u64,
    rng_counter: u64,
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

impl HnswGraph {
    pub fn new(dimension: usize, config: VectorSearchConfig) -> Self {
        Self {
            dimension,
            m: config.m.max(1),
            ef_construction: config.ef_construction.max(1),
            ef_search: config.ef_search.max(1),
            nodes: Vec::new(),
            row_id_to_node: HashMap::new(),
            entry_point: None,
            max_level: 0,
            rng_seed: 0x5EED_u64,
            rng_counter: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.row_id_to_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_id_to_node.is_empty()
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    fn assign_level(&mut self) -> usize {
        self.rng_counter += 1;
        let hash = splitmix64(self.rng_seed.wrapping_add(self.rng_counter));
        let uniform = ((hash as f64) / (u64::MAX as f64)).max(1e-15);
        let ml = 1.0 / (self.m as f64).ln().max(1e-9);
        (-uniform.ln() * ml) as usize
    }

    fn distance_to(&self, query: &[f32], node: usize) -> f32 {
        cosine_distance(query, &self.nodes[node].vector)
    }

    /// Beam search at a single layer (HNSW paper Algorithm 2). Returns up
    /// to `ef` closest non-deleted nodes, nearest first; deleted nodes are
    /// still traversed as waypoints (their neighbors are expanded) but
    /// never appear in the returned beam, matching the graph's tombstone
    /// semantics.
    fn search_layer(&self, query: &[f32], entry: usize, ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited = BTreeSet::new();
        visited.insert(entry);

        let entry_distance = self.distance_to(query, entry);
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        candidates.push(Reverse(Candidate {
            distance: entry_distance,
            node: entry,
        }));

        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
        if !self.nodes[entry].deleted {
            results.push(Candidate {
                distance: entry_distance,
                node: entry,
            });
        }

        while let Some(Reverse(nearest)) = candidates.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
            if nearest.distance > worst && results.len() >= ef {
                break;
            }
            if layer >= self.nodes[nearest.node].neighbors.len() {
                continue;
            }
            let neighbor_ids: Vec<usize> =
                self.nodes[nearest.node].neighbors[layer].iter().copied().collect();
            for neighbor in neighbor_ids {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.distance_to(query, neighbor);
                let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
                if results.len() < ef || dist < worst {
                    candidates.push(Reverse(Candidate { distance: dist, node: neighbor }));
                    if !self.nodes[neighbor].deleted {
                        results.push(Candidate { distance: dist, node: neighbor });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_vec();
        out.sort();
        out
    }

    /// Greedy single-nearest descent (ef=1), used above the node's own
    /// layer during insert and above layer 0 during search.
    fn greedy_search_to_layer(&self, query: &[f32], entry: usize, from: usize, to: usize) -> usize {
        let mut current = entry;
        for layer in (to..=from).rev() {
            loop {
                let current_dist = self.distance_to(query, current);
                let mut best = (current, current_dist);
                if layer < self.nodes[current].neighbors.len() {
                    for &neighbor in &self.nodes[current].neighbors[layer] {
                        let dist = self.distance_to(query, neighbor);
                        if dist < best.1 || (dist == best.1 && neighbor < best.0) {
                            best = (neighbor, dist);
                        }
                    }
                }
                if best.0 == current {
                    break;
                }
                current = best.0;
            }
        }
        current
    }

    /// Diversity-preferring neighbor selection (HNSW paper Algorithm 4,
    /// simplified heuristic form): candidates already sorted nearest-first;
    /// a candidate is kept only if it is closer to the query than to every
    /// neighbor already accepted, which favors spreading connections across
    /// distinct directions instead of clustering on the single nearest
    /// cluster. Falls back to filling from the remaining nearest candidates
    /// if the heuristic alone selects fewer than `max_connections`.
    fn select_diverse(&self, candidates: &[Candidate], max_connections: usize) -> Vec<usize> {
        let mut selected: Vec<usize> = Vec::with_capacity(max_connections);
        for cand in candidates {
            if selected.len() >= max_connections {
                break;
            }
            let keep = selected.iter().all(|&sel| {
                cosine_distance(&self.nodes[cand.node].vector, &self.nodes[sel].vector)
                    >= cand.distance
            });
            if keep {
                selected.push(cand.node);
            }
        }
        if selected.len() < max_connections {
            for cand in candidates {
                if selected.len() >= max_connections {
                    break;
                }
                if !selected.contains(&cand.node) {
                    selected.push(cand.node);
                }
            }
        }
        selected
    }

    fn prune_if_over_cap(&mut self, node: usize, layer: usize) {
        let cap = self.max_connections(layer);
        if self.nodes[node].neighbors[layer].len() <= cap {
            return;
        }
        let query = self.nodes[node].vector.clone();
        let mut scored: Vec<Candidate> = self.nodes[node].neighbors[layer]
            .iter()
            .map(|&n| Candidate {
                distance: self.distance_to(&query, n),
                node: n,
            })
            .collect();
        scored.sort();
        let kept = self.select_diverse(&scored, cap);
        self.nodes[node].neighbors[layer] = kept.into_iter().collect();
    }

    /// Inserts a vector under `row_id` using the standard layered-graph
    /// insert algorithm. `row_id` must not already be present.
    pub fn insert(&mut self, row_id: u64, vector: Vec<f32>) {
        let level = self.assign_level();
        let node_id = self.nodes.len();
        self.nodes.push(Node {
            row_id,
            vector: vector.clone(),
            neighbors: (0..=level).map(|_| BTreeSet::new()).collect(),
            deleted: false,
        });
        self.row_id_to_node.insert(row_id, node_id);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(node_id);
            self.max_level = level;
            return;
        };

        let mut current = entry;
        if level < self.max_level {
            current = self.greedy_search_to_layer(&vector, entry, self.max_level, level + 1);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let beam = self.search_layer(&vector, current, self.ef_construction, layer);
            if let Some(nearest) = beam.first() {
                current = nearest.node;
            }
            let max_conn = self.max_connections(layer);
            let chosen = self.select_diverse(&beam, max_conn);
            for &neighbor in &chosen {
                self.nodes[node_id].neighbors[layer].insert(neighbor);
                if layer < self.nodes[neighbor].neighbors.len() {
                    self.nodes[neighbor].neighbors[layer].insert(node_id);
                    self.prune_if_over_cap(neighbor, layer);
                }
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(node_id);
        }
    }

    /// Returns up to `k` row-ids nearest `query`, nearest first. Empty if
    /// the graph has no live vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        let current = if self.max_level > 0 {
            self.greedy_search_to_layer(query, entry, self.max_level, 1)
        } else {
            entry
        };
        let ef = self.ef_search.max(k);
        let beam = self.search_layer(query, current, ef, 0);
        beam.into_iter()
            .take(k)
            .map(|c| (self.nodes[c.node].row_id, c.distance))
            .collect()
    }

    /// Tombstones the node for `row_id`. Subsequent searches skip it;
    /// re-inserting the same row-id later allocates a fresh internal node
    /// rather than reviving the tombstone.
    pub fn remove(&mut self, row_id: u64) {
        if let Some(&node_id) = self.row_id_to_node.get(&row_id) {
            self.nodes[node_id].deleted = true;
            self.row_id_to_node.remove(&row_id);
        }
    }

    pub fn contains(&self, row_id: u64) -> bool {
        self.row_id_to_node.contains_key(&row_id)
    }

    /// All live (row_id, vector) pairs, used by `save_all` and by a
    /// from-scratch rebuild.
    pub fn live_vectors(&self) -> Vec<(u64, Vec<f32>)> {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .map(|n| (n.row_id, n.vector.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> VectorSearchConfig {
        VectorSearchConfig {
            m: 8,
            ef_construction: 64,
            ef_search: 32,
        }
    }

    #[test]
    fn finds_exact_duplicate_as_top1() {
        let mut g = HnswGraph::new(8, cfg());
        let mut rng_val = 17u64;
        for i in 0..200u64 {
            rng_val = splitmix64(rng_val);
            let v: Vec<f32> = (0..8)
                .map(|d| ((splitmix64(rng_val + d) % 1000) as f32) / 1000.0)
                .collect();
            g.insert(i, v);
        }
        let (_, target_vec) = g.live_vectors()[42].clone();
        let results = g.search(&target_vec, 5);
        assert_eq!(results[0].0, g.live_vectors()[42].0);
        assert!(results[0].1 < 1e-4);
    }

    #[test]
    fn removed_node_is_skipped_by_search() {
        let mut g = HnswGraph::new(4, cfg());
        g.insert(1, vec![1.0, 0.0, 0.0, 0.0]);
        g.insert(2, vec![1.0, 0.0001, 0.0, 0.0]);
        g.remove(1);
        let results = g.search(&[1.0, 0.0, 0.0, 0.0], 2);
        assert!(results.iter().all(|(id, _)| *id != 1));
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn search_returns_nondecreasing_distance() {
        let mut g = HnswGraph::new(4, cfg());
        for i in 0..50u64 {
            let v = vec![i as f32, (i * 2) as f32, (i % 7) as f32, 1.0];
            g.insert(i, v);
        }
        let results = g.search(&[10.0, 20.0, 3.0, 1.0], 10);
        let dists: Vec<f32> = results.iter().map(|(_, d)| *d).collect();
        for pair in dists.windows(2) {
            assert!(pair[0] <= pair[1] + 1e-6);
        }
    }
}
