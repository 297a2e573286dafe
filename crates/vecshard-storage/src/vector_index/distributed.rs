//! Fan-out query engine with scatter-gather search.
//!
//! # Algorithm
//!
//! 1. **Validate**: reject wrong-dimension queries before any network call
//! 2. **Route**: rank shards by centroid distance and keep the top `m`
//! 3. **Scatter**: query the selected shards concurrently, each under its own timeout
//! 4. **Gather**: failed or timed-out shards contribute nothing
//! 5. **Merge**: bounded-heap top-k under the query metric's direction
//!
//! A query that reaches no healthy shard returns an empty result set with every
//! target listed in [`SearchOutcome::failed_shards`]; it is not an error.

use super::client::ShardClientError;
use super::metric::DistanceMetric;
use crate::sharding::{ShardDirectory, ShardRouter};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vecshard_core::{check_dimension, ResultItem, ShardId, VecShardError};

/// Result from searching a single shard.
pub type ShardSearchResult = Result<Vec<ResultItem>, ShardClientError>;

/// Configuration for the fan-out engine.
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Timeout for each individual shard request.
    pub timeout: Duration,
}

impl FanOutConfig {
    /// Creates a configuration with the default 2s per-shard timeout.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            timeout: Duration::from_secs(2),
        }
    }

    /// Sets the per-shard timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query embedding.
    pub query_vector: Vec<f32>,
    /// Number of results wanted.
    pub top_k: usize,
    /// How many nearest shards to search. Clamped to the shard count.
    pub shards_to_search: usize,
    /// Metric used to score and rank results.
    pub metric: DistanceMetric,
}

impl SearchRequest {
    /// Creates a request searching the single nearest shard under L2.
    pub fn new(query_vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            query_vector,
            top_k,
            shards_to_search: 1,
            metric: DistanceMetric::default(),
        }
    }

    /// Sets the number of shards to search.
    pub fn with_shards(mut self, shards_to_search: usize) -> Self {
        self.shards_to_search = shards_to_search;
        self
    }

    /// Sets the ranking metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }
}

/// A shard that was targeted but contributed nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardFailure {
    /// The failed shard.
    pub shard_id: ShardId,
    /// Why it failed.
    pub reason: String,
}

/// Merged answer of a fan-out query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Merged results, best-first, at most `top_k`.
    pub results: Vec<ResultItem>,
    /// Shards the router selected, nearest first.
    pub searched_shards: Vec<ShardId>,
    /// Shards that errored or timed out.
    pub failed_shards: Vec<ShardFailure>,
    /// Version of the centroid snapshot used for routing.
    pub snapshot_version: u64,
}

impl SearchOutcome {
    /// Returns true if at least one targeted shard did not answer.
    pub fn is_degraded(&self) -> bool {
        !self.failed_shards.is_empty()
    }

    /// Returns the number of shards that answered.
    pub fn responding_shards(&self) -> usize {
        self.searched_shards.len() - self.failed_shards.len()
    }
}

/// Issues concurrent per-shard searches and merges their results.
///
/// # Example
///
/// ```ignore
/// let engine = FanOutQueryEngine::new(router, directory, FanOutConfig::new(768));
/// let request = SearchRequest::new(query, 10)
///     .with_shards(3)
///     .with_metric(DistanceMetric::Cosine);
/// let outcome = engine.search(&request).await?;
/// ```
pub struct FanOutQueryEngine {
    router: Arc<ShardRouter>,
    directory: Arc<ShardDirectory>,
    config: FanOutConfig,
}

impl FanOutQueryEngine {
    /// Creates a new engine.
    pub fn new(
        router: Arc<ShardRouter>,
        directory: Arc<ShardDirectory>,
        config: FanOutConfig,
    ) -> Self {
        Self {
            router,
            directory,
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Searches the `shards_to_search` nearest shards and merges their answers.
    ///
    /// Shard calls run concurrently inside the returned future and are never
    /// spawned, so dropping the future (e.g. the caller disconnected) cancels
    /// every outstanding shard request.
    pub async fn search(&self, request: &SearchRequest) -> vecshard_core::Result<SearchOutcome> {
        if request.top_k == 0 {
            return Err(VecShardError::InvalidArgument(
                "top_k must be greater than 0".to_string(),
            ));
        }
        check_dimension(self.config.dimension, &request.query_vector)?;

        let plan = self
            .router
            .plan_query(&request.query_vector, request.shards_to_search)?;

        let started = Instant::now();
        let shard_results = self
            .scatter_search(&plan.target_shards, request)
            .await;

        let mut partials = Vec::with_capacity(shard_results.len());
        let mut failed_shards = Vec::new();
        for (shard_id, result) in shard_results {
            match result {
                Ok(items) => partials.push((shard_id, items)),
                Err(e) => {
                    tracing::warn!(shard_id, error = %e, "Shard search failed");
                    failed_shards.push(ShardFailure {
                        shard_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !failed_shards.is_empty() {
            tracing::warn!(
                targeted = plan.target_shards.len(),
                failed = failed_shards.len(),
                "Fan-out search returned partial results"
            );
        }

        let results = merge_top_k(partials, request.top_k, request.metric);
        tracing::debug!(
            shards = plan.target_shards.len(),
            results = results.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Fan-out search complete"
        );

        Ok(SearchOutcome {
            results,
            searched_shards: plan.target_shards,
            failed_shards,
            snapshot_version: plan.snapshot_version,
        })
    }

    /// Scatter search to the target shards in parallel.
    async fn scatter_search(
        &self,
        targets: &[ShardId],
        request: &SearchRequest,
    ) -> Vec<(ShardId, ShardSearchResult)> {
        let futures = targets.iter().map(|&shard_id| async move {
            let result = self
                .search_shard(shard_id, &request.query_vector, request.top_k, request.metric)
                .await;
            (shard_id, result)
        });

        futures::future::join_all(futures).await
    }

    /// Searches one shard under the per-request timeout.
    async fn search_shard(
        &self,
        shard_id: ShardId,
        query: &[f32],
        top_k: usize,
        metric: DistanceMetric,
    ) -> ShardSearchResult {
        let client = self.directory.client(shard_id).ok_or_else(|| {
            ShardClientError::ConnectionFailed {
                addr: format!("shard_{}", shard_id),
                message: "No client registered for shard".to_string(),
            }
        })?;

        let timeout = self.config.timeout;
        let mut items = match tokio::time::timeout(timeout, client.local_search(query, top_k, metric)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ShardClientError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };

        // The router, not the shard, is authoritative about where a hit came from.
        for item in &mut items {
            item.shard_id = shard_id;
        }
        Ok(items)
    }
}

impl std::fmt::Debug for FanOutQueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutQueryEngine")
            .field("num_shards", &self.directory.num_shards())
            .field("dimension", &self.config.dimension)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

// =============================================================================
// Top-k merge
// =============================================================================

/// A result item ordered worst-last under a metric.
///
/// `Ord` puts better items first: score in the metric's direction, then
/// ascending shard id, then ascending id.
struct Ranked {
    item: ResultItem,
    metric: DistanceMetric,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.metric
            .compare_scores(self.item.score, other.item.score)
            .then_with(|| self.item.shard_id.cmp(&other.item.shard_id))
            .then_with(|| self.item.id.cmp(&other.item.id))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Selects the best `k` items, best-first.
///
/// Time complexity: O(n log k). A max-heap keyed by rank keeps the worst
/// retained item on top so it can be evicted in O(log k). NaN scores are
/// dropped.
pub fn select_top_k<I>(items: I, k: usize, metric: DistanceMetric) -> Vec<ResultItem>
where
    I: IntoIterator<Item = ResultItem>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(k + 1);
    for item in items {
        if item.score.is_nan() {
            continue;
        }
        heap.push(Ranked { item, metric });
        if heap.len() > k {
            heap.pop();
        }
    }

    heap.into_sorted_vec().into_iter().map(|r| r.item).collect()
}

/// Merges per-shard partial result sets into one global top-k.
///
/// Each partial is re-stamped with the shard it came from. If the same id is
/// reported by several shards (possible after a retrain moved its placement),
/// only its best-ranked occurrence is kept.
pub fn merge_top_k(
    partials: Vec<(ShardId, Vec<ResultItem>)>,
    k: usize,
    metric: DistanceMetric,
) -> Vec<ResultItem> {
    let mut best_by_id: HashMap<String, ResultItem> = HashMap::new();

    for (shard_id, items) in partials {
        for mut item in items {
            item.shard_id = shard_id;
            match best_by_id.entry(item.id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(item);
                }
                Entry::Occupied(mut slot) => {
                    let current = slot.get();
                    let better = metric
                        .compare_scores(item.score, current.score)
                        .then_with(|| item.shard_id.cmp(&current.shard_id))
                        == Ordering::Less;
                    if better {
                        slot.insert(item);
                    }
                }
            }
        }
    }

    select_top_k(best_by_id.into_values(), k, metric)
}

// =============================================================================
// Tests
// =============================================================================
