//! Content-addressed writes.
//!
//! A record goes to exactly one shard: the one whose centroid is nearest to
//! its vector under the snapshot active at write time. The chosen shard is
//! remembered in the placement map so later point lookups are direct.

use crate::sharding::{PlacementMap, ShardDirectory, ShardRouter};
use std::sync::Arc;
use vecshard_core::{check_dimension, Record, Result, ShardId, VecShardError};

/// Routes and stores records.
pub struct WritePath {
    router: Arc<ShardRouter>,
    directory: Arc<ShardDirectory>,
    placement: Arc<PlacementMap>,
    dimension: usize,
}

impl WritePath {
    /// Creates a write path for vectors of `dimension`.
    pub fn new(
        router: Arc<ShardRouter>,
        directory: Arc<ShardDirectory>,
        placement: Arc<PlacementMap>,
        dimension: usize,
    ) -> Self {
        Self {
            router,
            directory,
            placement,
            dimension,
        }
    }

    /// Stores `record` on its nearest shard and returns that shard's id.
    ///
    /// Dimension and routing errors are raised before any shard is contacted.
    /// A failing shard surfaces as `ShardUnavailable`; there is no fallback
    /// owner.
    ///
    /// Placement is last-recorded-wins. Two concurrent puts of one id that
    /// route to different shards (around a snapshot swap) may leave the map
    /// naming either shard; `get` then reads that copy, and a later put or a
    /// stale-entry probe settles it.
    pub async fn put(&self, record: Record) -> Result<ShardId> {
        check_dimension(self.dimension, &record.vector)?;

        let plan = self.router.plan_write(&record.vector)?;
        let shard_id = plan
            .primary()
            .ok_or(VecShardError::EmptySnapshot)?;
        let client = self.directory.require(shard_id)?;

        let id = record.id.clone();
        client
            .store(record)
            .await
            .map_err(|e| e.into_unavailable(shard_id))?;

        self.placement.record(&id, shard_id)?;
        tracing::debug!(
            id = %id,
            shard_id,
            snapshot_version = plan.snapshot_version,
            "Stored record"
        );

        Ok(shard_id)
    }

    /// Returns the placement map maintained by this write path.
    pub fn placement(&self) -> &Arc<PlacementMap> {
        &self.placement
    }
}

impl std::fmt::Debug for WritePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePath")
            .field("dimension", &self.dimension)
            .field("num_shards", &self.directory.num_shards())
            .field("placement", &self.placement)
            .finish()
    }
}
