//! Cross-shard coordinator.
//!
//! Owns the centroid index, shard directory and placement map of one router
//! process and exposes the operations the router API serves: put, get,
//! search, explicit centroid installation and retraining from stored data.

use super::centroids::{CentroidIndex, CentroidSnapshot};
use super::directory::{ShardDirectory, ShardInfo};
use super::placement::PlacementMap;
use super::router::ShardRouter;
use super::trainer::{sample_ids, CentroidTrainer, TrainingConfig};
use crate::config::VecShardConfig;
use crate::persistence::{self, BackupConfig};
use crate::vector_index::{
    DistanceMetric, FanOutConfig, FanOutQueryEngine, SearchOutcome, SearchRequest, ShardFailure,
    WritePath,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vecshard_core::{Record, Result, ShardId, VecShardError, Vector};

/// Concurrent fetches issued while sampling for a retrain.
const SAMPLE_FETCH_CONCURRENCY: usize = 16;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Vector dimension `D`.
    pub dimension: usize,
    /// Per-shard request timeout.
    pub shard_timeout: Duration,
    /// Metric used when a request does not name one.
    pub default_metric: DistanceMetric,
    /// Results returned when a request does not say.
    pub default_top_k: usize,
    /// Shards searched when a request does not say.
    pub default_shards_to_search: usize,
    /// Fraction of stored ids sampled on retrain.
    pub sample_fraction: f64,
    /// Cap on the retrain sample.
    pub max_samples: usize,
    /// Seed for sampling and k-means.
    pub seed: u64,
    /// Where installed snapshots are saved.
    pub snapshot_path: Option<PathBuf>,
    /// Older snapshot files to keep.
    pub snapshot_backups: usize,
}

impl CoordinatorConfig {
    /// Creates a configuration with defaults for `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            shard_timeout: Duration::from_secs(2),
            default_metric: DistanceMetric::L2,
            default_top_k: 5,
            default_shards_to_search: 1,
            sample_fraction: 0.1,
            max_samples: 100_000,
            seed: 42,
            snapshot_path: None,
            snapshot_backups: 3,
        }
    }

    /// Extracts the coordinator settings from the full configuration.
    pub fn from_config(config: &VecShardConfig) -> Self {
        Self {
            dimension: config.cluster.dimension,
            shard_timeout: config.query.shard_timeout(),
            default_metric: config.cluster.default_metric,
            default_top_k: config.query.default_top_k,
            default_shards_to_search: config.query.default_shards_to_search,
            sample_fraction: config.training.sample_fraction,
            max_samples: config.training.max_samples,
            seed: config.training.seed,
            snapshot_path: config.training.snapshot_path.clone(),
            snapshot_backups: config.training.snapshot_backups,
        }
    }

    /// Sets the per-shard timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.shard_timeout = timeout;
        self
    }
}

/// A record found by id, with the shard that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundRecord {
    pub record: Record,
    pub found_in: ShardId,
}

/// Summary of a completed retrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainReport {
    /// Version of the newly installed snapshot.
    pub snapshot_version: u64,
    /// Ids seen across all responding shards.
    pub total_ids: usize,
    /// Vectors the centroids were trained on.
    pub samples: usize,
    /// Shards that could not be listed or read.
    pub failed_shards: Vec<ShardFailure>,
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub dimension: usize,
    pub num_shards: usize,
    pub snapshot_version: u64,
    pub centroids: Option<BTreeMap<ShardId, Vector>>,
    pub shards: Vec<ShardInfo>,
    pub placed_ids: usize,
}

/// Coordinates writes, reads, searches and retraining across shards.
pub struct ShardCoordinator {
    config: CoordinatorConfig,
    index: Arc<CentroidIndex>,
    directory: Arc<ShardDirectory>,
    placement: Arc<PlacementMap>,
    write_path: WritePath,
    engine: FanOutQueryEngine,
    trainer: CentroidTrainer,
    /// Serializes snapshot installs so versions stay strictly increasing.
    install_lock: tokio::sync::Mutex<()>,
}

impl ShardCoordinator {
    /// Creates a coordinator over an existing directory and placement map.
    ///
    /// No snapshot is installed; routing fails with `EmptySnapshot` until
    /// [`set_centroids`](Self::set_centroids), [`retrain`](Self::retrain) or
    /// [`install_snapshot`](Self::install_snapshot) is called.
    pub fn new(
        config: CoordinatorConfig,
        directory: Arc<ShardDirectory>,
        placement: Arc<PlacementMap>,
        trainer: CentroidTrainer,
    ) -> Self {
        let index = Arc::new(CentroidIndex::new(config.dimension, directory.num_shards()));
        let router = Arc::new(ShardRouter::new(Arc::clone(&index)));

        let write_path = WritePath::new(
            Arc::clone(&router),
            Arc::clone(&directory),
            Arc::clone(&placement),
            config.dimension,
        );
        let engine = FanOutQueryEngine::new(
            router,
            Arc::clone(&directory),
            FanOutConfig::new(config.dimension).with_timeout(config.shard_timeout),
        );

        Self {
            config,
            index,
            directory,
            placement,
            write_path,
            engine,
            trainer,
            install_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Builds the whole router state from configuration.
    ///
    /// Opens file-backed shards and the placement log, and reinstalls the
    /// saved snapshot when one exists at `training.snapshot_path`.
    pub fn from_config(config: &VecShardConfig) -> Result<Self> {
        let directory = Arc::new(ShardDirectory::from_config(config)?);
        let placement = Arc::new(match &config.placement.log_path {
            Some(path) => PlacementMap::open(path)?,
            None => PlacementMap::in_memory(),
        });
        let trainer = CentroidTrainer::new(TrainingConfig::from(&config.training));
        let coordinator = Self::new(
            CoordinatorConfig::from_config(config),
            directory,
            placement,
            trainer,
        );

        if let Some(path) = &coordinator.config.snapshot_path {
            if path.exists() {
                let snapshot = persistence::load_snapshot(path)?;
                tracing::info!(path = %path.display(), version = snapshot.version(), "Restoring centroid snapshot");
                coordinator.index.replace(snapshot)?;
            }
        }

        Ok(coordinator)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns the centroid index.
    pub fn index(&self) -> &Arc<CentroidIndex> {
        &self.index
    }

    /// Returns the shard directory.
    pub fn directory(&self) -> &Arc<ShardDirectory> {
        &self.directory
    }

    /// Returns the placement map.
    pub fn placement(&self) -> &Arc<PlacementMap> {
        &self.placement
    }

    // =========================================================================
    // Data path
    // =========================================================================

    /// Stores a record on its nearest shard.
    pub async fn put(&self, record: Record) -> Result<ShardId> {
        self.write_path.put(record).await
    }

    /// Fetches a record by id.
    ///
    /// Goes straight to the shard recorded in the placement map. Ids that are
    /// not in the map (or no longer on their recorded shard) are looked up on
    /// every shard concurrently; the lowest shard id holding it wins.
    pub async fn get(&self, id: &str) -> Result<Option<FoundRecord>> {
        if let Some(shard_id) = self.placement.lookup(id) {
            let client = self.directory.require(shard_id)?;
            let fetched = tokio::time::timeout(self.config.shard_timeout, client.fetch(id)).await;
            match fetched {
                Ok(Ok(Some(record))) => {
                    return Ok(Some(FoundRecord {
                        record,
                        found_in: shard_id,
                    }))
                }
                Ok(Ok(None)) => {
                    tracing::debug!(id, shard_id, "Placement entry is stale, probing all shards");
                }
                Ok(Err(e)) => return Err(e.into_unavailable(shard_id)),
                Err(_) => {
                    return Err(VecShardError::ShardUnavailable {
                        shard_id,
                        reason: format!(
                            "fetch timed out after {}ms",
                            self.config.shard_timeout.as_millis()
                        ),
                    })
                }
            }
        }

        self.probe(id).await
    }

    /// Asks every shard for `id` at once.
    async fn probe(&self, id: &str) -> Result<Option<FoundRecord>> {
        let timeout = self.config.shard_timeout;
        let fetches = self.directory.all_clients().iter().map(|client| async move {
            let shard_id = client.shard_id();
            match tokio::time::timeout(timeout, client.fetch(id)).await {
                Ok(Ok(found)) => found.map(|record| (shard_id, record)),
                Ok(Err(e)) => {
                    tracing::warn!(shard_id, error = %e, "Shard failed during id probe");
                    None
                }
                Err(_) => {
                    tracing::warn!(shard_id, "Shard timed out during id probe");
                    None
                }
            }
        });

        let found = futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .min_by_key(|(shard_id, _)| *shard_id);

        Ok(found.map(|(shard_id, record)| FoundRecord {
            record,
            found_in: shard_id,
        }))
    }

    /// Runs a fan-out search.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        self.engine.search(request).await
    }

    /// Builds a request from optional parameters, filling in the defaults.
    pub fn request(
        &self,
        query_vector: Vector,
        top_k: Option<usize>,
        shards_to_search: Option<usize>,
        metric: Option<DistanceMetric>,
    ) -> SearchRequest {
        SearchRequest::new(query_vector, top_k.unwrap_or(self.config.default_top_k))
            .with_shards(shards_to_search.unwrap_or(self.config.default_shards_to_search))
            .with_metric(metric.unwrap_or(self.config.default_metric))
    }

    // =========================================================================
    // Centroid management
    // =========================================================================

    /// Installs an explicit `shard_id → centroid` map as the next version.
    pub async fn set_centroids(&self, centroids: BTreeMap<ShardId, Vector>) -> Result<Arc<CentroidSnapshot>> {
        let _guard = self.install_lock.lock().await;
        let snapshot = CentroidSnapshot::from_map(self.index.version() + 1, centroids)?;
        self.install_locked(snapshot).await
    }

    /// Installs a prepared snapshot as-is.
    pub async fn install_snapshot(&self, snapshot: CentroidSnapshot) -> Result<Arc<CentroidSnapshot>> {
        let _guard = self.install_lock.lock().await;
        self.install_locked(snapshot).await
    }

    /// Validates and saves `snapshot`, then swaps it in.
    ///
    /// A snapshot that cannot be saved is never activated.
    async fn install_locked(&self, snapshot: CentroidSnapshot) -> Result<Arc<CentroidSnapshot>> {
        self.index.validate(&snapshot)?;
        let snapshot = Arc::new(snapshot);
        self.persist(&snapshot).await?;
        self.index.replace((*snapshot).clone())?;
        Ok(snapshot)
    }

    /// Saves the snapshot if a snapshot path is configured.
    async fn persist(&self, snapshot: &Arc<CentroidSnapshot>) -> Result<()> {
        let Some(path) = self.config.snapshot_path.clone() else {
            return Ok(());
        };
        let snapshot = Arc::clone(snapshot);
        let version = snapshot.version();
        let backups = BackupConfig::new(self.config.snapshot_backups);
        let target = path.clone();

        // Blocking I/O in spawn_blocking
        let saved = tokio::task::spawn_blocking(move || {
            persistence::save_snapshot_with_backups(&snapshot, &target, &backups)
        })
        .await
        .map_err(|e| VecShardError::Persistence(format!("snapshot save task failed: {}", e)))?;

        if let Err(e) = saved {
            if e.is_critical() {
                tracing::error!(path = %path.display(), version, error = %e, "Snapshot save failed, previous file may be damaged");
            } else {
                tracing::warn!(path = %path.display(), version, error = %e, "Snapshot save failed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Retrains centroids from a sample of the vectors already stored.
    ///
    /// Shards that fail to list or serve ids are skipped and reported. Stored
    /// records are not moved; only future routing changes.
    pub async fn retrain(&self) -> Result<RetrainReport> {
        let _guard = self.install_lock.lock().await;
        let mut failed_shards = Vec::new();

        // 1. Inventory: id -> owning shard (lowest shard id on duplicates).
        let timeout = self.config.shard_timeout;
        let listings = futures::future::join_all(self.directory.all_clients().iter().map(|client| async move {
            let shard_id = client.shard_id();
            let listed = match tokio::time::timeout(timeout, client.list_ids()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("list_ids timed out after {}ms", timeout.as_millis())),
            };
            (shard_id, listed)
        }))
        .await;

        let mut owners: BTreeMap<String, ShardId> = BTreeMap::new();
        for (shard_id, listed) in listings {
            match listed {
                Ok(ids) => {
                    for id in ids {
                        owners.entry(id).or_insert(shard_id);
                    }
                }
                Err(reason) => {
                    tracing::warn!(shard_id, reason = %reason, "Skipping shard in retrain");
                    failed_shards.push(ShardFailure { shard_id, reason });
                }
            }
        }

        // 2. Seeded sample of ids.
        let all_ids: BTreeSet<String> = owners.keys().cloned().collect();
        let chosen = sample_ids(
            &all_ids,
            self.config.sample_fraction,
            self.directory.num_shards(),
            self.config.max_samples,
            self.config.seed,
        );

        // 3. Fetch sampled vectors, keeping sample order for determinism.
        let fetched: Vec<Option<Vector>> = stream::iter(chosen.iter().cloned().map(|id: String| {
            let shard_id = owners[&id];
            let client = self.directory.client(shard_id);
            async move {
                let id = &id;
                let Some(client) = client else {
                    return None;
                };
                match tokio::time::timeout(timeout, client.fetch(id)).await {
                    Ok(Ok(Some(record))) => Some(record.vector),
                    Ok(Ok(None)) => None,
                    Ok(Err(e)) => {
                        tracing::warn!(shard_id, id = %id, error = %e, "Sample fetch failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(shard_id, id = %id, "Sample fetch timed out");
                        None
                    }
                }
            }
        }))
        .buffered(SAMPLE_FETCH_CONCURRENCY)
        .collect()
        .await;
        let samples: Vec<Vector> = fetched.into_iter().flatten().collect();

        // 4. Train and install.
        let snapshot = self.trainer.next_snapshot(&self.index, &samples)?;
        let snapshot = self.install_locked(snapshot).await?;

        tracing::info!(
            version = snapshot.version(),
            total_ids = all_ids.len(),
            samples = samples.len(),
            skipped_shards = failed_shards.len(),
            "Retrained centroids"
        );

        Ok(RetrainReport {
            snapshot_version: snapshot.version(),
            total_ids: all_ids.len(),
            samples: samples.len(),
            failed_shards,
        })
    }

    /// Returns a status snapshot.
    pub fn status(&self) -> CoordinatorStatus {
        let snapshot = self.index.snapshot();
        CoordinatorStatus {
            dimension: self.config.dimension,
            num_shards: self.directory.num_shards(),
            snapshot_version: snapshot.as_ref().map(|s| s.version()).unwrap_or(0),
            centroids: snapshot.map(|s| s.to_map()),
            shards: self.directory.shard_infos(),
            placed_ids: self.placement.len(),
        }
    }
}

impl std::fmt::Debug for ShardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCoordinator")
            .field("config", &self.config)
            .field("index", &self.index)
            .field("directory", &self.directory)
            .field("placement", &self.placement)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
