//! Centroid-based routing for writes and queries.
//!
//! Writes go to exactly one shard (the nearest centroid); queries go to the
//! `m` nearest shards. Both decisions come from a single snapshot load, so
//! a plan always reflects one consistent centroid version.

use super::centroids::CentroidIndex;
use std::sync::Arc;
use vecshard_core::{Result, ShardId, VecShardError};

/// A routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Shards to contact, nearest first.
    pub target_shards: Vec<ShardId>,
    /// Whether results need to be merged from multiple shards.
    pub requires_merge: bool,
    /// Version of the centroid snapshot the plan was computed from.
    pub snapshot_version: u64,
}

impl QueryPlan {
    /// Creates a plan targeting a single shard.
    pub fn single_shard(shard_id: ShardId, snapshot_version: u64) -> Self {
        Self {
            target_shards: vec![shard_id],
            requires_merge: false,
            snapshot_version,
        }
    }

    /// Creates a plan for specific shards.
    pub fn specific_shards(shards: Vec<ShardId>, snapshot_version: u64) -> Self {
        Self {
            requires_merge: shards.len() > 1,
            target_shards: shards,
            snapshot_version,
        }
    }

    /// Returns the nearest shard of the plan.
    pub fn primary(&self) -> Option<ShardId> {
        self.target_shards.first().copied()
    }
}

/// Plans writes and queries against the active centroid snapshot.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    index: Arc<CentroidIndex>,
}

impl ShardRouter {
    /// Creates a new shard router.
    pub fn new(index: Arc<CentroidIndex>) -> Self {
        Self { index }
    }

    /// Returns the centroid index the router reads from.
    pub fn index(&self) -> &Arc<CentroidIndex> {
        &self.index
    }

    /// Plans a write: exactly the nearest shard.
    pub fn plan_write(&self, vector: &[f32]) -> Result<QueryPlan> {
        let (shards, version) = self.index.nearest_shards_with_version(vector, 1)?;
        let shard_id = shards.first().copied().ok_or(VecShardError::EmptySnapshot)?;
        Ok(QueryPlan::single_shard(shard_id, version))
    }

    /// Plans a query over the `m` nearest shards (clamped to the shard count).
    pub fn plan_query(&self, vector: &[f32], m: usize) -> Result<QueryPlan> {
        let (shards, version) = self.index.nearest_shards_with_version(vector, m)?;
        Ok(QueryPlan::specific_shards(shards, version))
    }

    /// Plans a scan over every shard, ignoring centroids.
    pub fn plan_full_scan(&self) -> QueryPlan {
        let shards = (0..self.index.num_shards() as ShardId).collect();
        QueryPlan::specific_shards(shards, self.index.version())
    }
}

// =============================================================================
// Tests
// =============================================================================
