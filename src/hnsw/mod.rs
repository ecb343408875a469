//! HNSW (Hierarchical Navigable Small World) index module.

pub mod graph;
pub mod neighbor_queue;

pub use graph::{HnswGraph, HnswParams};

use std::collections::BTreeMap;

use crate::distance::DistanceMetric;
use crate::error::{IndexServiceError, Result};
use crate::index::{top_k, Neighbor, VectorIndex};
use crate::vector::Vector;

/// An HNSW-based approximate nearest neighbor index.
///
/// The quality parameter is the search breadth `ef_search`. Replacing an id
/// unlinks its old node and inserts a fresh one, reusing the freed slot.
#[derive(Debug)]
pub struct HnswIndex {
    graph: HnswGraph,
    /// Caller id -> graph slot
    slots: BTreeMap<i64, usize>,
    dimension: usize,
}

impl HnswIndex {
    /// Create a new HNSW index with default parameters.
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self::with_params(dimension, metric, HnswParams::default())
    }

    /// Create a new HNSW index with custom parameters.
    pub fn with_params(dimension: usize, metric: DistanceMetric, params: HnswParams) -> Self {
        Self {
            graph: HnswGraph::new(metric, params),
            slots: BTreeMap::new(),
            dimension,
        }
    }
}

impl VectorIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn total(&self) -> usize {
        self.graph.len()
    }

    fn metric(&self) -> DistanceMetric {
        self.graph.metric()
    }

    fn set_quality(&mut self, quality: usize) {
        self.graph.set_ef_search(quality);
    }

    fn quality(&self) -> usize {
        self.graph.params().ef_search
    }

    fn get_vector(&self, id: i64) -> Option<&Vector> {
        self.slots
            .get(&id)
            .and_then(|&slot| self.graph.get_vector(slot))
    }

    fn upsert(&mut self, id: i64, vector: Vector) -> Result<()> {
        if self.dimension == 0 {
            self.dimension = vector.dimension();
        }
        if let Some(old) = self.slots.remove(&id) {
            self.graph.remove(old);
        }
        let slot = self.graph.next_slot();
        self.graph.insert(slot, id, vector)?;
        self.slots.insert(id, slot);
        Ok(())
    }

    fn delete(&mut self, id: i64) -> bool {
        match self.slots.remove(&id) {
            Some(slot) => self.graph.remove(slot).is_some(),
            None => false,
        }
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<Neighbor>> {
        if self.graph.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        if query.dimension() != self.dimension {
            return Err(IndexServiceError::DimensionMismatch {
                expected: self.dimension,
                actual: query.dimension(),
            });
        }

        let scored = self
            .graph
            .search_knn(query, k)?
            .into_iter()
            .filter_map(|c| self.graph.id_of(c.slot).map(|id| (id, c.distance)))
            .collect();
        Ok(top_k(self.metric(), scored, k))
    }

    fn entries(&self) -> Vec<(i64, &Vector)> {
        self.slots
            .iter()
            .filter_map(|(&id, &slot)| self.graph.get_vector(slot).map(|v| (id, v)))
            .collect()
    }

    fn clear(&mut self, dimension: usize) {
        let metric = self.graph.metric();
        let params = self.graph.params().clone();
        self.graph = HnswGraph::new(metric, params);
        self.slots.clear();
        self.dimension = dimension;
    }
}
