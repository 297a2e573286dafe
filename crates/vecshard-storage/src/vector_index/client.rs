//! The capability interface between the router and one shard's storage engine.
//!
//! Every backend (in-process memory shard, file-backed shard, remote HTTP
//! shard) implements [`ShardClient`]; the router only ever holds
//! `Arc<dyn ShardClient>` handles obtained from the shard directory.

use super::metric::DistanceMetric;
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;
use vecshard_core::{Record, ResultItem, ShardId, VecShardError};

/// Errors that can occur while talking to a single shard.
#[derive(Error, Debug)]
pub enum ShardClientError {
    /// Connection failed.
    #[error("Connection failed to {addr}: {message}")]
    ConnectionFailed { addr: String, message: String },

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// The shard refused the request (e.g. wrong dimension).
    #[error("Rejected by shard: {0}")]
    Rejected(String),

    /// Local storage failure inside the shard.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ShardClientError {
    /// Converts into the routing-layer error for `shard_id`.
    pub fn into_unavailable(self, shard_id: ShardId) -> VecShardError {
        VecShardError::ShardUnavailable {
            shard_id,
            reason: self.to_string(),
        }
    }
}

/// Result type for shard client operations.
pub type ShardResult<T> = std::result::Result<T, ShardClientError>;

/// Operations the router needs from one shard.
///
/// Implementations must be cheap to share: the router calls them concurrently
/// from many tasks through an `Arc`.
#[async_trait]
pub trait ShardClient: Send + Sync {
    /// Returns the shard this client talks to.
    fn shard_id(&self) -> ShardId;

    /// Returns a human-readable endpoint description for logs and status pages.
    fn endpoint(&self) -> String;

    /// Upserts a record. Overwriting an existing id is allowed.
    async fn store(&self, record: Record) -> ShardResult<()>;

    /// Fetches a record by id. `Ok(None)` means the shard does not hold it.
    async fn fetch(&self, id: &str) -> ShardResult<Option<Record>>;

    /// Returns this shard's own best `top_k` candidates, ranked best-first.
    async fn local_search(
        &self,
        query: &[f32],
        top_k: usize,
        metric: DistanceMetric,
    ) -> ShardResult<Vec<ResultItem>>;

    /// Lists every id held by the shard. Maintenance path only.
    async fn list_ids(&self) -> ShardResult<BTreeSet<String>>;
}

// =============================================================================
// Tests
// =============================================================================
