//! Brute-force flat index: exact k-NN by scanning every vector.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::distance::DistanceMetric;
use crate::error::{IndexServiceError, Result};
use crate::index::{top_k, Neighbor, VectorIndex};
use crate::vector::Vector;

/// Above this many entries the scan is spread across the rayon pool.
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

/// A flat (brute-force) index that computes distance to every stored vector.
#[derive(Debug)]
pub struct FlatIndex {
    vectors: BTreeMap<i64, Vector>,
    metric: DistanceMetric,
    dimension: usize,
}

impl FlatIndex {
    /// Create a new empty flat index. A dimension of 0 is fixed by the first insert.
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            vectors: BTreeMap::new(),
            metric,
            dimension,
        }
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn total(&self) -> usize {
        self.vectors.len()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn set_quality(&mut self, _quality: usize) {}

    fn quality(&self) -> usize {
        1
    }

    fn get_vector(&self, id: i64) -> Option<&Vector> {
        self.vectors.get(&id)
    }

    fn upsert(&mut self, id: i64, vector: Vector) -> Result<()> {
        if self.dimension == 0 {
            self.dimension = vector.dimension();
        }
        self.vectors.insert(id, vector);
        Ok(())
    }

    fn delete(&mut self, id: i64) -> bool {
        self.vectors.remove(&id).is_some()
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<Neighbor>> {
        if self.vectors.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        if query.dimension() != self.dimension {
            return Err(IndexServiceError::DimensionMismatch {
                expected: self.dimension,
                actual: query.dimension(),
            });
        }

        let q = query.as_slice();
        let scored: Vec<(i64, f32)> = if self.vectors.len() >= PARALLEL_SCAN_THRESHOLD {
            self.vectors
                .par_iter()
                .map(|(&id, v)| (id, self.metric.distance_unchecked(q, v.as_slice())))
                .collect()
        } else {
            self.vectors
                .iter()
                .map(|(&id, v)| (id, self.metric.distance_unchecked(q, v.as_slice())))
                .collect()
        };

        Ok(top_k(self.metric, scored, k))
    }

    fn entries(&self) -> Vec<(i64, &Vector)> {
        self.vectors.iter().map(|(&id, v)| (id, v)).collect()
    }

    fn clear(&mut self, dimension: usize) {
        self.vectors.clear();
        self.dimension = dimension;
    }
}
