//! The fixed shard table: `shard_id → client`.
//!
//! Built once at startup from the `[cluster]` configuration. The set of shards
//! never changes at runtime; changing `N` means a restart with a matching
//! centroid snapshot.

use crate::config::{ShardBackend, VecShardConfig};
use crate::vector_index::{HttpShardClient, LocalShard, ShardClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use vecshard_core::{Result, ShardId, VecShardError};

/// Information about a shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Shard identifier.
    pub id: ShardId,
    /// Where the shard is reached (`http://…`, `memory://…`, `file://…`).
    pub endpoint: String,
}

/// Maps shard ids to their clients.
pub struct ShardDirectory {
    clients: Vec<Arc<dyn ShardClient>>,
}

impl ShardDirectory {
    /// Creates a directory from clients whose ids are exactly `0..N`.
    ///
    /// Clients may be passed in any order.
    pub fn new(mut clients: Vec<Arc<dyn ShardClient>>) -> Result<Self> {
        if clients.is_empty() {
            return Err(VecShardError::InvalidArgument(
                "shard directory needs at least one shard".to_string(),
            ));
        }
        clients.sort_by_key(|c| c.shard_id());
        for (expected, client) in clients.iter().enumerate() {
            if client.shard_id() as usize != expected {
                return Err(VecShardError::InvalidArgument(format!(
                    "shard ids must be exactly 0..{}, shard {} is missing or duplicated",
                    clients.len(),
                    expected
                )));
            }
        }
        Ok(Self { clients })
    }

    /// Builds every configured backend.
    ///
    /// File-backed shards are opened (and replayed) here; HTTP shards are
    /// only configured, never contacted.
    pub fn from_config(config: &VecShardConfig) -> Result<Self> {
        let dimension = config.cluster.dimension;
        let timeout = config.query.shard_timeout();

        let clients = config
            .cluster
            .shards
            .iter()
            .map(|entry| build_client(entry.id, &entry.backend, dimension, timeout))
            .collect::<Result<Vec<_>>>()?;

        let directory = Self::new(clients)?;
        for info in directory.shard_infos() {
            tracing::info!(shard_id = info.id, endpoint = %info.endpoint, "Registered shard");
        }
        Ok(directory)
    }

    /// Returns the client of one shard.
    pub fn client(&self, shard_id: ShardId) -> Option<Arc<dyn ShardClient>> {
        self.clients.get(shard_id as usize).cloned()
    }

    /// Returns the client of one shard or `UnknownShard`.
    pub fn require(&self, shard_id: ShardId) -> Result<Arc<dyn ShardClient>> {
        self.client(shard_id)
            .ok_or(VecShardError::UnknownShard(shard_id))
    }

    /// Returns every client in shard order.
    pub fn all_clients(&self) -> &[Arc<dyn ShardClient>] {
        &self.clients
    }

    /// Returns the number of shards `N`.
    pub fn num_shards(&self) -> usize {
        self.clients.len()
    }

    /// Describes every shard.
    pub fn shard_infos(&self) -> Vec<ShardInfo> {
        self.clients
            .iter()
            .map(|c| ShardInfo {
                id: c.shard_id(),
                endpoint: c.endpoint(),
            })
            .collect()
    }
}

impl std::fmt::Debug for ShardDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardDirectory")
            .field("shards", &self.shard_infos())
            .finish()
    }
}

fn build_client(
    shard_id: ShardId,
    backend: &ShardBackend,
    dimension: usize,
    timeout: Duration,
) -> Result<Arc<dyn ShardClient>> {
    let client: Arc<dyn ShardClient> = match backend {
        ShardBackend::Memory => Arc::new(LocalShard::new(shard_id, dimension)),
        ShardBackend::File { path } => Arc::new(
            LocalShard::open(shard_id, dimension, path)
                .map_err(|e| VecShardError::Persistence(e.to_string()))?,
        ),
        ShardBackend::Http { url } => Arc::new(
            HttpShardClient::new(shard_id, url.clone(), timeout)
                .map_err(|e| e.into_unavailable(shard_id))?,
        ),
    };
    Ok(client)
}
