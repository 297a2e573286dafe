//! Vector storage and search across shards.
//!
//! This module provides:
//! - Distance metrics and their ordering
//! - The `ShardClient` seam with in-process and HTTP implementations
//! - The HTTP API a single shard serves
//! - The write path and the fan-out query engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        WritePath                     FanOutQueryEngine           │
//! │   (nearest shard only)         (m nearest, timeout, merge)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                    ShardClients                           │   │
//! │  │  ┌────────┐  ┌────────┐  ┌────────┐  ┌────────┐         │   │
//! │  │  │Shard 0 │  │Shard 1 │  │Shard 2 │  │Shard 3 │         │   │
//! │  │  │(local) │  │(HTTP)  │  │(HTTP)  │  │(local) │         │   │
//! │  │  └────────┘  └────────┘  └────────┘  └────────┘         │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod client;
mod distributed;
mod http;
mod local;
mod metric;
mod server;
mod write_path;

pub use metric::{
    cosine_similarity, dot_product, euclidean_distance, squared_euclidean, DistanceMetric,
    OrderDirection,
};

pub use client::{ShardClient, ShardClientError, ShardResult};
pub use http::HttpShardClient;
pub use local::LocalShard;

pub use server::{
    serve_shard, shard_router, ErrorBody, ListIdsResponse, SearchBody, SearchResponse,
    ShardStatus, StoreResponse,
};

pub use distributed::{
    merge_top_k, select_top_k, FanOutConfig, FanOutQueryEngine, SearchOutcome, SearchRequest,
    ShardFailure,
};
pub use write_path::WritePath;
