//! # Vecshard Core
//!
//! Core types shared by every vecshard component.
//!
//! This crate provides the fundamental building blocks:
//! - [`ShardId`] and [`Vector`] - routing identifiers and payloads
//! - [`Record`] - a caller-identified vector
//! - [`ResultItem`] - one ranked hit of a similarity search
//! - [`VecShardError`] - the error taxonomy of the routing layer

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a shard. The shard set of a deployment is always `0..N`.
pub type ShardId = u32;

/// A dense embedding. Its length must equal the deployment dimension `D`.
pub type Vector = Vec<f32>;

// =============================================================================
// Records
// =============================================================================

/// A vector together with its caller-supplied identifier.
///
/// Ids are unique across the whole system, not just within a shard. Storing a
/// record under an existing id overwrites it at the owning shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Caller-supplied identifier.
    pub id: String,
    /// The embedding.
    pub vector: Vector,
}

impl Record {
    /// Creates a new record.
    pub fn new(id: impl Into<String>, vector: Vector) -> Self {
        Self {
            id: id.into(),
            vector,
        }
    }

    /// Returns the dimensionality of the vector.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (dim={})", self.id, self.vector.len())
    }
}

// =============================================================================
// Search results
// =============================================================================

/// One hit of a similarity search.
///
/// The meaning of `score` depends on the metric that produced it: a distance
/// for L2, a similarity for cosine and inner product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Record identifier.
    pub id: String,
    /// Metric score.
    pub score: f32,
    /// Shard that returned the hit.
    pub shard_id: ShardId,
}

impl ResultItem {
    /// Creates a new result item.
    pub fn new(id: impl Into<String>, score: f32, shard_id: ShardId) -> Self {
        Self {
            id: id.into(),
            score,
            shard_id,
        }
    }
}

/// Result items ordered best-first under the query metric.
pub type ResultSet = Vec<ResultItem>;

// =============================================================================
// Errors
// =============================================================================

/// Errors of the routing and aggregation layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VecShardError {
    /// A vector's length does not match the deployment dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Routing was attempted before any centroid snapshot was installed.
    #[error("No centroid snapshot installed")]
    EmptySnapshot,

    /// Training was given fewer samples than requested clusters.
    #[error("Insufficient samples: {samples} samples for {k} clusters")]
    InsufficientSamples { samples: usize, k: usize },

    /// A single shard failed or timed out.
    #[error("Shard {shard_id} unavailable: {reason}")]
    ShardUnavailable { shard_id: ShardId, reason: String },

    /// The shard id is not part of the configured shard set.
    #[error("Unknown shard: {0}")]
    UnknownShard(ShardId),

    /// A centroid snapshot does not fit the deployment.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A request parameter is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Local persistence (placement log, snapshot file) failed.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl VecShardError {
    /// Returns true for errors caused by the request itself.
    ///
    /// These are rejected before any shard is contacted and must not be retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VecShardError::DimensionMismatch { .. } | VecShardError::InvalidArgument(_)
        )
    }
}

/// Result type for vecshard operations.
pub type Result<T> = std::result::Result<T, VecShardError>;

/// Checks that `vector` has exactly `expected` components.
#[inline]
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(VecShardError::DimensionMismatch {
            expected,
            actual: vector.len(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
