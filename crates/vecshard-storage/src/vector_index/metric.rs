//! Distance metrics and their ordering direction.
//!
//! Scores are reported in the metric's natural unit: L2 returns a distance
//! (smaller is closer) while cosine and inner product return a similarity
//! (larger is closer). Everything that sorts or merges scores must go through
//! [`DistanceMetric::compare_scores`] instead of assuming one direction.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use vecshard_core::{Result, VecShardError};

// =============================================================================
// Distance Metrics
// =============================================================================

/// Distance metric for vector similarity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    /// Euclidean (L2) distance. Range: 0.0 to infinity. Smaller is closer.
    #[default]
    #[serde(rename = "l2", alias = "L2", alias = "euclidean")]
    L2,
    /// Cosine similarity. Range: -1.0 to 1.0. Larger is closer.
    #[serde(rename = "cosine", alias = "COSINE")]
    Cosine,
    /// Raw dot product. Larger is closer.
    #[serde(rename = "ip", alias = "IP", alias = "inner_product", alias = "dot_product")]
    InnerProduct,
}

/// Which end of the score range is "better" for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Smaller scores rank first.
    Ascending,
    /// Larger scores rank first.
    Descending,
}

impl DistanceMetric {
    /// Returns the ordering direction of this metric's scores.
    pub fn direction(&self) -> OrderDirection {
        match self {
            DistanceMetric::L2 => OrderDirection::Ascending,
            DistanceMetric::Cosine | DistanceMetric::InnerProduct => OrderDirection::Descending,
        }
    }

    /// Returns true if a smaller score means a closer match.
    #[inline]
    pub fn smaller_is_better(&self) -> bool {
        self.direction() == OrderDirection::Ascending
    }

    /// Computes the score of `b` relative to `a`.
    ///
    /// Fails with `DimensionMismatch` if the vectors differ in length.
    pub fn score(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(VecShardError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(self.score_unchecked(a, b))
    }

    /// Computes the score without validating lengths.
    ///
    /// Callers must have checked that both vectors have the same dimension.
    #[inline]
    pub fn score_unchecked(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => euclidean_distance(a, b),
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::InnerProduct => dot_product(a, b),
        }
    }

    /// Orders two scores best-first.
    ///
    /// `Ordering::Less` means `a` ranks ahead of `b`. Uses IEEE total ordering
    /// so the comparison is never undefined.
    #[inline]
    pub fn compare_scores(&self, a: f32, b: f32) -> Ordering {
        match self.direction() {
            OrderDirection::Ascending => a.total_cmp(&b),
            OrderDirection::Descending => b.total_cmp(&a),
        }
    }

    /// Returns true if `a` is strictly better than `b`.
    #[inline]
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        self.compare_scores(a, b) == Ordering::Less
    }

    /// Returns the canonical wire name of the metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::InnerProduct => "ip",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = VecShardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            "ip" | "inner_product" | "dot_product" => Ok(DistanceMetric::InnerProduct),
            other => Err(VecShardError::InvalidArgument(format!(
                "unknown metric '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Kernels
// =============================================================================

/// Computes the dot product of two equal-length vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimension mismatch");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Computes the squared Euclidean distance. Used where only ordering matters.
#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimension mismatch");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Computes the Euclidean (L2) distance.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

/// Computes cosine similarity.
///
/// Returns 0.0 when either vector has zero norm, so a zero vector is never a
/// match in either direction.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimension mismatch");

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

// =============================================================================
// Tests
// =============================================================================
