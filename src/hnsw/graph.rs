//! HNSW graph: node storage, insertion, removal and layered search.
//!
//! Implements the Hierarchical Navigable Small World graph from:
//! "Efficient and robust approximate nearest neighbor search using
//!  Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2016/2018).
//!
//! Nodes live in dense slots. The caller-assigned `i64` id is carried on each
//! node so search results can be reported without a reverse lookup. Slots
//! freed by removal are handed out again, so the slot table never outgrows
//! the peak number of live nodes.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::distance::DistanceMetric;
use crate::error::{IndexServiceError, Result};
use crate::vector::Vector;

use super::neighbor_queue::{Candidate, MaxHeap, MinHeap};

/// Configuration parameters for the HNSW index.
#[derive(Debug, Clone)]
pub struct HnswParams {
    /// Max number of connections per node (layers > 0).
    pub m: usize,
    /// Max connections at layer 0 (typically 2 * m).
    pub m_max0: usize,
    /// Number of candidates during construction.
    pub ef_construction: usize,
    /// Number of candidates during search.
    pub ef_search: usize,
    /// Level generation factor: 1 / ln(m).
    pub ml: f64,
    /// Maximum number of layers.
    pub max_layers: usize,
    /// Seed for level generation, so rebuilding from the same file is reproducible.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 200, 50)
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            m,
            m_max0: 2 * m,
            ef_construction,
            ef_search,
            ml: 1.0 / (m as f64).ln(),
            max_layers: 16,
            seed: 0x5eed_1dea,
        }
    }
}

#[derive(Debug, Clone)]
struct HnswNode {
    id: i64,
    vector: Vector,
    /// neighbors[l] is the list of neighbor slots at layer l.
    neighbors: Vec<Vec<usize>>,
    level: usize,
}

/// The HNSW graph structure.
#[derive(Debug)]
pub struct HnswGraph {
    /// Slots can be None after deletion.
    nodes: Vec<Option<HnswNode>>,
    /// Empty slots, reused before the table grows.
    free: Vec<usize>,
    entry_point: Option<usize>,
    max_level: usize,
    params: HnswParams,
    metric: DistanceMetric,
    rng: StdRng,
    count: usize,
}

impl HnswGraph {
    pub fn new(metric: DistanceMetric, params: HnswParams) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng: StdRng::seed_from_u64(params.seed),
            params,
            metric,
            count: 0,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn set_ef_search(&mut self, ef: usize) {
        self.params.ef_search = ef.max(1);
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Next unused slot: a freed one if any, else a new one at the end.
    pub fn next_slot(&self) -> usize {
        self.free.last().copied().unwrap_or(self.nodes.len())
    }

    /// Size of the slot table, live and freed slots included.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    fn random_level(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        let level = (-r.ln() * self.params.ml).floor() as usize;
        level.min(self.params.max_layers - 1)
    }

    fn distance(&self, query: &Vector, slot: usize) -> Result<f32> {
        let node = self.nodes[slot]
            .as_ref()
            .ok_or_else(|| IndexServiceError::IndexError(format!("Slot {} is empty", slot)))?;
        Ok(self
            .metric
            .distance_unchecked(query.as_slice(), node.vector.as_slice()))
    }

    /// The vector stored in a slot.
    pub fn get_vector(&self, slot: usize) -> Option<&Vector> {
        self.nodes.get(slot).and_then(|n| n.as_ref()).map(|n| &n.vector)
    }

    /// The caller-assigned id stored in a slot.
    pub fn id_of(&self, slot: usize) -> Option<i64> {
        self.nodes.get(slot).and_then(|n| n.as_ref()).map(|n| n.id)
    }

    /// SEARCH-LAYER: Algorithm 2 from the HNSW paper.
    ///
    /// Returns up to `ef` closest slots reachable on `layer` from `ep`.
    fn search_layer(
        &self,
        query: &Vector,
        ep: &[usize],
        ef: usize,
        layer: usize,
    ) -> Result<Vec<Candidate>> {
        let mut visited = HashSet::new();
        let mut candidates = MinHeap::new();
        let mut results = MaxHeap::new();

        for &ep_slot in ep {
            let dist = self.distance(query, ep_slot)?;
            visited.insert(ep_slot);
            candidates.push(Candidate::new(ep_slot, dist));
            results.push(Candidate::new(ep_slot, dist));
        }

        while let Some(c) = candidates.pop() {
            let furthest = results.peek().map(|n| n.distance).unwrap_or(f32::MAX);
            if c.distance > furthest {
                break;
            }

            let Some(node) = &self.nodes[c.slot] else {
                continue;
            };
            let Some(layer_neighbors) = node.neighbors.get(layer) else {
                continue;
            };

            for &neighbor in layer_neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                if self.nodes.get(neighbor).and_then(|n| n.as_ref()).is_none() {
                    continue;
                }

                let dist = self.distance(query, neighbor)?;
                let furthest = results.peek().map(|n| n.distance).unwrap_or(f32::MAX);

                if dist < furthest || results.len() < ef {
                    candidates.push(Candidate::new(neighbor, dist));
                    results.push(Candidate::new(neighbor, dist));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        Ok(results.into_sorted_vec())
    }

    /// Keep at most `m` of a node's neighbors at `layer`, closest first.
    fn prune_neighbors(&mut self, slot: usize, layer: usize, m: usize) {
        let (neighbor_slots, node_vec) = match &self.nodes[slot] {
            Some(n) if layer < n.neighbors.len() => (n.neighbors[layer].clone(), n.vector.clone()),
            _ => return,
        };

        let mut scored: Vec<Candidate> = neighbor_slots
            .into_iter()
            .filter_map(|s| {
                self.get_vector(s).map(|v| {
                    let dist = self
                        .metric
                        .distance_unchecked(node_vec.as_slice(), v.as_slice());
                    Candidate::new(s, dist)
                })
            })
            .collect();
        scored.sort();
        scored.truncate(m);

        if let Some(node) = &mut self.nodes[slot] {
            node.neighbors[layer] = scored.into_iter().map(|c| c.slot).collect();
        }
    }

    /// INSERT: Algorithm 1 from the HNSW paper. `slot` must be unused.
    pub fn insert(&mut self, slot: usize, id: i64, vector: Vector) -> Result<()> {
        if self.nodes.get(slot).is_some_and(|n| n.is_some()) {
            return Err(IndexServiceError::IndexError(format!(
                "Slot {} is already occupied",
                slot
            )));
        }

        let level = self.random_level();
        if slot >= self.nodes.len() {
            let start = self.nodes.len();
            self.nodes.resize_with(slot + 1, || None);
            self.free.extend(start..slot);
        }
        self.free.retain(|&s| s != slot);
        self.nodes[slot] = Some(HnswNode {
            id,
            vector: vector.clone(),
            neighbors: vec![Vec::new(); level + 1],
            level,
        });
        self.count += 1;

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(slot);
            self.max_level = level;
            return Ok(());
        };
        let current_max_level = self.max_level;

        // Greedy descent through the layers above the new node's level.
        for l in (level + 1..=current_max_level).rev() {
            if let Some(n) = self.search_layer(&vector, &[ep], 1, l)?.first() {
                ep = n.slot;
            }
        }

        for l in (0..=level.min(current_max_level)).rev() {
            let m = if l == 0 {
                self.params.m_max0
            } else {
                self.params.m
            };

            let nearest = self.search_layer(&vector, &[ep], self.params.ef_construction, l)?;
            let neighbors: Vec<usize> = nearest
                .iter()
                .filter(|c| c.slot != slot)
                .take(m)
                .map(|c| c.slot)
                .collect();

            if let Some(node) = &mut self.nodes[slot] {
                node.neighbors[l] = neighbors.clone();
            }

            for &neighbor in &neighbors {
                let needs_pruning = match &mut self.nodes[neighbor] {
                    Some(n) if l < n.neighbors.len() => {
                        // A reused slot may still be listed by an old one-way edge.
                        if !n.neighbors[l].contains(&slot) {
                            n.neighbors[l].push(slot);
                        }
                        n.neighbors[l].len() > m
                    }
                    _ => false,
                };
                if needs_pruning {
                    self.prune_neighbors(neighbor, l, m);
                }
            }

            if let Some(n) = nearest.first() {
                ep = n.slot;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(slot);
            self.max_level = level;
        }

        Ok(())
    }

    /// Unlink a slot from the graph. Returns the node's id if the slot was live.
    pub fn remove(&mut self, slot: usize) -> Option<i64> {
        let node = self.nodes.get_mut(slot)?.take()?;

        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            for &neighbor in neighbors {
                if let Some(Some(n)) = self.nodes.get_mut(neighbor) {
                    if let Some(list) = n.neighbors.get_mut(layer) {
                        list.retain(|&s| s != slot);
                    }
                }
            }
        }
        self.count -= 1;
        self.free.push(slot);

        if self.entry_point == Some(slot) {
            self.entry_point = self
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.as_ref().map(|n| (i, n.level)))
                .max_by_key(|&(_, level)| level)
                .map(|(i, _)| i);
            self.max_level = self
                .entry_point
                .and_then(|ep| self.nodes[ep].as_ref().map(|n| n.level))
                .unwrap_or(0);
        }

        Some(node.id)
    }

    /// SEARCH: Algorithm 5 from the HNSW paper, using the configured ef_search.
    pub fn search_knn(&self, query: &Vector, k: usize) -> Result<Vec<Candidate>> {
        self.search_with_ef(query, k, self.params.ef_search)
    }

    /// Search with an explicit ef (runtime tuning without rebuilding).
    pub fn search_with_ef(&self, query: &Vector, k: usize, ef: usize) -> Result<Vec<Candidate>> {
        let Some(mut ep) = self.entry_point else {
            return Ok(vec![]);
        };

        for l in (1..=self.max_level).rev() {
            if let Some(n) = self.search_layer(query, &[ep], 1, l)?.first() {
                ep = n.slot;
            }
        }

        let mut results = self.search_layer(query, &[ep], ef.max(k), 0)?;
        results.truncate(k);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_params() -> HnswParams {
        HnswParams::new(4, 32, 16)
    }

    #[test]
    fn test_insert_single() {
        let mut graph = HnswGraph::new(DistanceMetric::L2, make_params());
        graph.insert(0, 100, Vector::new(vec![1.0, 0.0, 0.0])).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.id_of(0), Some(100));
        assert!(graph.entry_point.is_some());
    }

    #[test]
    fn test_insert_into_occupied_slot_fails() {
        let mut graph = HnswGraph::new(DistanceMetric::L2, make_params());
        graph.insert(0, 1, Vector::new(vec![1.0])).unwrap();
        assert!(graph.insert(0, 2, Vector::new(vec![2.0])).is_err());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_self_search() {
        let mut graph = HnswGraph::new(DistanceMetric::L2, make_params());
        let vectors: Vec<Vector> = (0..100)
            .map(|i| {
                Vector::new(vec![
                    (i as f32) * 0.1,
                    ((i * 7) as f32) * 0.1,
                    ((i * 13) as f32) * 0.1,
                ])
            })
            .collect();

        for (i, v) in vectors.iter().enumerate() {
            graph.insert(i, i as i64, v.clone()).unwrap();
        }

        for (i, v) in vectors.iter().enumerate() {
            let results = graph.search_knn(v, 1).unwrap();
            assert!(!results.is_empty(), "No results for vector {}", i);
            assert!(
                results[0].distance < 1e-5,
                "Self-search for {} returned distance {} (slot={})",
                i,
                results[0].distance,
                results[0].slot
            );
        }
    }

    #[test]
    fn test_search_knn() {
        let mut graph = HnswGraph::new(DistanceMetric::L2, make_params());
        for i in 0..5 {
            graph
                .insert(i, i as i64, Vector::new(vec![i as f32, 0.0]))
                .unwrap();
        }

        let results = graph.search_knn(&Vector::new(vec![0.5, 0.0]), 2).unwrap();
        let slots: HashSet<usize> = results.iter().map(|n| n.slot).collect();
        assert_eq!(results.len(), 2);
        assert!(slots.contains(&0));
        assert!(slots.contains(&1));
    }

    #[test]
    fn test_remove() {
        let mut graph = HnswGraph::new(DistanceMetric::L2, make_params());
        graph.insert(0, 10, Vector::new(vec![1.0, 0.0])).unwrap();
        graph.insert(1, 11, Vector::new(vec![0.0, 1.0])).unwrap();

        assert_eq!(graph.remove(0), Some(10));
        assert_eq!(graph.remove(0), None);
        assert_eq!(graph.len(), 1);

        let results = graph.search_knn(&Vector::new(vec![0.0, 1.0]), 1).unwrap();
        assert_eq!(results[0].slot, 1);
    }

    #[test]
    fn test_removed_slot_is_reused() {
        let mut graph = HnswGraph::new(DistanceMetric::L2, make_params());
        for i in 0..3 {
            let slot = graph.next_slot();
            graph.insert(slot, i, Vector::new(vec![i as f32, 0.0])).unwrap();
        }
        assert_eq!(graph.next_slot(), 3);

        graph.remove(1);
        assert_eq!(graph.next_slot(), 1);
        graph.insert(1, 42, Vector::new(vec![1.5, 0.0])).unwrap();
        assert_eq!(graph.slot_count(), 3);
        assert_eq!(graph.next_slot(), 3);

        let results = graph.search_knn(&Vector::new(vec![1.5, 0.0]), 1).unwrap();
        assert_eq!(graph.id_of(results[0].slot), Some(42));
    }

    #[test]
    fn test_insert_past_end_frees_the_gap() {
        let mut graph = HnswGraph::new(DistanceMetric::L2, make_params());
        graph.insert(2, 7, Vector::new(vec![1.0])).unwrap();
        assert_eq!(graph.slot_count(), 3);
        let slot = graph.next_slot();
        assert!(slot < 2);
        graph.insert(slot, 8, Vector::new(vec![2.0])).unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_remove_entry_point() {
        let mut graph = HnswGraph::new(DistanceMetric::L2, make_params());
        graph.insert(0, 0, Vector::new(vec![1.0, 0.0])).unwrap();
        graph.insert(1, 1, Vector::new(vec![0.0, 1.0])).unwrap();
        graph.insert(2, 2, Vector::new(vec![1.0, 1.0])).unwrap();

        let ep = graph.entry_point.unwrap();
        graph.remove(ep);
        assert_eq!(graph.len(), 2);

        let results = graph.search_knn(&Vector::new(vec![0.0, 1.0]), 1).unwrap();
        assert!(!results.is_empty());
    }
}
