//! Distance metrics for vector similarity
//!
//! Engines always rank by a "lower is closer" distance. The score reported to
//! callers depends on the metric: squared L2 distance is reported as is,
//! inner product is reported as the similarity itself.

use serde::{Deserialize, Serialize};

/// Distance metrics for measuring vector similarity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance, smaller is closer
    #[default]
    L2,
    /// Dot product similarity, larger is closer
    InnerProduct,
}

impl DistanceMetric {
    /// Ranking distance between two slices of equal length (lower is closer).
    pub(crate) fn distance_unchecked(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => squared_l2(a, b),
            DistanceMetric::InnerProduct => -dot_product(a, b),
        }
    }

    /// Convert a ranking distance into the score callers see.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::L2 => distance,
            DistanceMetric::InnerProduct => -distance,
        }
    }
}

/// Squared Euclidean distance
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Dot product of two slices
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
