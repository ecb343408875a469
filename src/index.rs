//! The nearest-neighbor engine contract consumed by the index service.

use std::cmp::Ordering;
use std::path::Path;

use serde::Serialize;

use crate::distance::DistanceMetric;
use crate::error::{IndexServiceError, Result};
use crate::persistence::index_file::IndexFile;
use crate::vector::Vector;

/// One search hit: a caller-assigned id and its score under the index metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: i64,
    pub score: f32,
}

/// A mutable nearest-neighbor index keyed by caller-assigned `i64` ids.
///
/// Implementors provide single-entry primitives; batch operations, by-id
/// search and persistence are built on top of them here so every engine
/// validates and persists the same way.
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    /// Dimension of stored vectors, 0 until the first insert.
    fn dimension(&self) -> usize;

    /// Number of live entries.
    fn total(&self) -> usize;

    /// The distance metric used by this index.
    fn metric(&self) -> DistanceMetric;

    /// Tune the accuracy/speed trade-off. Exact engines ignore it.
    fn set_quality(&mut self, quality: usize);

    /// Current quality parameter.
    fn quality(&self) -> usize;

    /// Retrieve a vector by id.
    fn get_vector(&self, id: i64) -> Option<&Vector>;

    /// Insert or replace a single, already validated vector.
    fn upsert(&mut self, id: i64, vector: Vector) -> Result<()>;

    /// Delete by id, returning whether the id was present.
    fn delete(&mut self, id: i64) -> bool;

    /// Search for the `k` nearest neighbors of `query`, closest first.
    fn search(&self, query: &Vector, k: usize) -> Result<Vec<Neighbor>>;

    /// All live entries, ordered by id.
    fn entries(&self) -> Vec<(i64, &Vector)>;

    /// Drop every entry and reset the dimension.
    fn clear(&mut self, dimension: usize);

    /// Upsert a batch. Nothing is written unless every vector fits.
    fn replace(&mut self, ids: &[i64], vectors: Vec<Vector>) -> Result<()> {
        check_batch(self.dimension(), ids, &vectors)?;
        for (&id, vector) in ids.iter().zip(vectors) {
            self.upsert(id, vector)?;
        }
        Ok(())
    }

    /// Remove a batch of ids, returning how many were present.
    fn remove(&mut self, ids: &[i64]) -> usize {
        ids.iter().filter(|&&id| self.delete(id)).count()
    }

    /// Search using a resident vector as the query. `None` if the id is absent.
    fn search_by_id(&self, id: i64, k: usize) -> Result<Option<Vec<Neighbor>>> {
        match self.get_vector(id) {
            Some(vector) => self.search(vector, k).map(Some),
            None => Ok(None),
        }
    }

    /// Persist every entry to `path`.
    fn save(&self, path: &Path) -> Result<()> {
        IndexFile::capture(self).write(path)
    }

    /// Replace the contents of this index with a decoded, compatible index file.
    fn load(&mut self, file: IndexFile) -> Result<()> {
        self.clear(file.dimension);
        for (id, data) in file.entries {
            self.upsert(id, Vector::new(data))?;
        }
        Ok(())
    }
}

/// Validate a batch against the index dimension (0 = not yet fixed).
///
/// Returns the dimension the batch establishes.
pub fn check_batch(dimension: usize, ids: &[i64], vectors: &[Vector]) -> Result<usize> {
    if ids.len() != vectors.len() {
        return Err(IndexServiceError::RowCountMismatch {
            embeddings: vectors.len(),
            ids: ids.len(),
        });
    }

    let expected = match (dimension, vectors.first()) {
        (0, Some(first)) => first.dimension(),
        (0, None) => return Ok(0),
        (d, _) => d,
    };
    if expected == 0 {
        return Err(IndexServiceError::InvalidVector {
            reason: "Embedding must not be empty".to_string(),
        });
    }

    for vector in vectors {
        if vector.dimension() != expected {
            return Err(IndexServiceError::DimensionMismatch {
                expected,
                actual: vector.dimension(),
            });
        }
        if vector.as_slice().iter().any(|x| !x.is_finite()) {
            return Err(IndexServiceError::InvalidVector {
                reason: "Embedding contains NaN or infinite values".to_string(),
            });
        }
    }
    Ok(expected)
}

/// Sort `(id, distance)` candidates closest first, ties by id, and keep `k`.
pub(crate) fn top_k(metric: DistanceMetric, mut scored: Vec<(i64, f32)>, k: usize) -> Vec<Neighbor> {
    scored.sort_by(|a, b| match a.1.total_cmp(&b.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    scored.truncate(k);
    scored
        .into_iter()
        .map(|(id, distance)| Neighbor {
            id,
            score: metric.score(distance),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch_infers_dimension() {
        let vectors = vec![Vector::new(vec![1.0, 2.0]), Vector::new(vec![3.0, 4.0])];
        assert_eq!(check_batch(0, &[1, 2], &vectors).unwrap(), 2);
    }

    #[test]
    fn test_check_batch_rejects_mixed_widths() {
        let vectors = vec![Vector::new(vec![1.0, 2.0]), Vector::new(vec![3.0])];
        assert!(matches!(
            check_batch(0, &[1, 2], &vectors),
            Err(IndexServiceError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_check_batch_rejects_empty_embedding() {
        let vectors = vec![Vector::new(vec![])];
        assert!(matches!(
            check_batch(0, &[1], &vectors),
            Err(IndexServiceError::InvalidVector { .. })
        ));
    }

    #[test]
    fn test_check_batch_rejects_row_count_mismatch() {
        let vectors = vec![Vector::new(vec![1.0])];
        assert!(matches!(
            check_batch(1, &[1, 2], &vectors),
            Err(IndexServiceError::RowCountMismatch { .. })
        ));
    }

    #[test]
    fn test_top_k_breaks_ties_by_id() {
        let scored = vec![(9, 1.0), (3, 1.0), (5, 0.5)];
        let top = top_k(DistanceMetric::L2, scored, 2);
        assert_eq!(top.iter().map(|n| n.id).collect::<Vec<_>>(), vec![5, 3]);
    }
}
