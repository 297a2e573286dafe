//! Centroid-based sharding.
//!
//! Each shard owns the region of vector space nearest to its centroid.
//! Writes go to the single nearest shard; queries fan out to the `m`
//! nearest and their results are merged.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       ShardCoordinator                          │
//! │                                                                 │
//! │  ┌───────────────┐   ┌───────────────┐   ┌──────────────────┐  │
//! │  │ CentroidIndex │◄──│  ShardRouter  │   │ CentroidTrainer  │  │
//! │  │  (ArcSwap)    │   │ (QueryPlan)   │   │   (k-means)      │  │
//! │  └───────▲───────┘   └───────┬───────┘   └────────┬─────────┘  │
//! │          └───────────────────┼────────────────────┘            │
//! │                              │                                  │
//! │                     ┌────────▼────────┐   ┌───────────────┐    │
//! │                     │ ShardDirectory  │   │ PlacementMap  │    │
//! │                     └────────┬────────┘   └───────────────┘    │
//! │              ┌───────────────┼───────────────┐                 │
//! │        ┌─────▼─────┐   ┌─────▼─────┐   ┌─────▼─────┐           │
//! │        │  Shard 0  │   │  Shard 1  │   │  Shard 2  │           │
//! │        └───────────┘   └───────────┘   └───────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod centroids;
mod coordinator;
mod directory;
mod placement;
mod router;
mod trainer;

pub use centroids::{CentroidIndex, CentroidSnapshot};
pub use coordinator::{
    CoordinatorConfig, CoordinatorStatus, FoundRecord, RetrainReport, ShardCoordinator,
};
pub use directory::{ShardDirectory, ShardInfo};
pub use placement::PlacementMap;
pub use router::{QueryPlan, ShardRouter};
pub use trainer::{sample_ids, CentroidTrainer, TrainingConfig};
