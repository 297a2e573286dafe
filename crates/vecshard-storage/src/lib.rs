//! Storage and routing layer for vecshard.
//!
//! Vectors are partitioned across shards by nearest centroid. This crate
//! holds the centroid index and its trainer, the shard directory and
//! clients, the write path, the fan-out query engine and the HTTP shard
//! server, together with configuration, logging and snapshot persistence.

pub mod config;
pub mod embed;
pub mod logging;
pub mod persistence;
pub mod sharding;
pub mod vector_index;
pub mod wal;

// Re-exports
pub use config::{ConfigError, VecShardConfig};
pub use sharding::{
    CentroidIndex, CentroidSnapshot, CentroidTrainer, PlacementMap, ShardCoordinator,
    ShardDirectory, ShardRouter,
};
pub use vector_index::{
    DistanceMetric, FanOutQueryEngine, LocalShard, SearchOutcome, SearchRequest, ShardClient,
    WritePath,
};
