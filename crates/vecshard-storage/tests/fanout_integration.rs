//! Integration tests for routed writes and fan-out search.
//!
//! Covers the end-to-end path through the coordinator and the engine's
//! behaviour when shards fail, stall or are abandoned mid-query.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vecshard_core::{Record, ResultItem, ShardId, VecShardError, Vector};
use vecshard_storage::sharding::{
    CentroidIndex, CentroidSnapshot, CentroidTrainer, CoordinatorConfig, PlacementMap,
    ShardCoordinator, ShardDirectory, ShardRouter,
};
use vecshard_storage::vector_index::{
    DistanceMetric, FanOutConfig, FanOutQueryEngine, LocalShard, SearchRequest, ShardClient,
    ShardClientError, ShardResult,
};

// =============================================================================
// Test shards
// =============================================================================

/// A shard whose every call fails.
struct BrokenShard {
    id: ShardId,
}

#[async_trait]
impl ShardClient for BrokenShard {
    fn shard_id(&self) -> ShardId {
        self.id
    }

    fn endpoint(&self) -> String {
        format!("broken://{}", self.id)
    }

    async fn store(&self, _record: Record) -> ShardResult<()> {
        Err(ShardClientError::Storage("disk on fire".to_string()))
    }

    async fn fetch(&self, _id: &str) -> ShardResult<Option<Record>> {
        Err(ShardClientError::Storage("disk on fire".to_string()))
    }

    async fn local_search(&self, _q: &[f32], _k: usize, _m: DistanceMetric) -> ShardResult<Vec<ResultItem>> {
        Err(ShardClientError::ServerError {
            status: 503,
            message: "unavailable".to_string(),
        })
    }

    async fn list_ids(&self) -> ShardResult<BTreeSet<String>> {
        Err(ShardClientError::Storage("disk on fire".to_string()))
    }
}

/// Sets a flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A shard whose searches take `delay`, recording starts, completions and drops.
struct SlowShard {
    inner: LocalShard,
    delay: Duration,
    started: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl SlowShard {
    fn new(id: ShardId, dimension: usize, delay: Duration) -> Self {
        Self {
            inner: LocalShard::new(id, dimension),
            delay,
            started: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl ShardClient for SlowShard {
    fn shard_id(&self) -> ShardId {
        self.inner.id()
    }

    fn endpoint(&self) -> String {
        format!("slow://{}", self.inner.id())
    }

    async fn store(&self, record: Record) -> ShardResult<()> {
        self.inner.store(record).await
    }

    async fn fetch(&self, id: &str) -> ShardResult<Option<Record>> {
        self.inner.fetch(id).await
    }

    async fn local_search(&self, q: &[f32], k: usize, m: DistanceMetric) -> ShardResult<Vec<ResultItem>> {
        let guard = DropFlag(Arc::clone(&self.dropped));
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        std::mem::forget(guard);
        self.inner.local_search(q, k, m).await
    }

    async fn list_ids(&self) -> ShardResult<BTreeSet<String>> {
        self.inner.list_ids().await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn local_coordinator(centroids: &[&[f32]]) -> ShardCoordinator {
    let dimension = centroids[0].len();
    let clients: Vec<Arc<dyn ShardClient>> = (0..centroids.len() as ShardId)
        .map(|id| Arc::new(LocalShard::new(id, dimension)) as Arc<dyn ShardClient>)
        .collect();
    let directory = Arc::new(ShardDirectory::new(clients).unwrap());
    ShardCoordinator::new(
        CoordinatorConfig::new(dimension),
        directory,
        Arc::new(PlacementMap::in_memory()),
        CentroidTrainer::default(),
    )
}

fn centroid_map(centroids: &[&[f32]]) -> BTreeMap<ShardId, Vector> {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i as ShardId, c.to_vec()))
        .collect()
}

fn engine_over(
    clients: Vec<Arc<dyn ShardClient>>,
    centroids: Vec<Vector>,
    timeout: Duration,
) -> FanOutQueryEngine {
    let dimension = centroids[0].len();
    let num_shards = clients.len();
    let directory = Arc::new(ShardDirectory::new(clients).unwrap());
    let snapshot = CentroidSnapshot::new(1, centroids).unwrap();
    let index = Arc::new(CentroidIndex::with_snapshot(dimension, num_shards, snapshot).unwrap());
    FanOutQueryEngine::new(
        Arc::new(ShardRouter::new(index)),
        directory,
        FanOutConfig::new(dimension).with_timeout(timeout),
    )
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test]
async fn test_two_shard_round_trip() {
    let coordinator = local_coordinator(&[&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]]);
    coordinator
        .set_centroids(centroid_map(&[&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]]))
        .await
        .unwrap();

    assert_eq!(coordinator.put(Record::new("a", vec![0.1, 0.1, 0.1])).await.unwrap(), 0);
    assert_eq!(coordinator.put(Record::new("b", vec![0.9, 0.9, 0.9])).await.unwrap(), 1);
    assert_eq!(coordinator.put(Record::new("c", vec![0.2, 0.0, 0.1])).await.unwrap(), 0);

    let found = coordinator.get("b").await.unwrap().unwrap();
    assert_eq!(found.found_in, 1);
    assert_eq!(found.record.vector, vec![0.9, 0.9, 0.9]);

    // m = 1 only consults shard 0.
    let outcome = coordinator
        .search(&SearchRequest::new(vec![0.0, 0.0, 0.0], 2))
        .await
        .unwrap();
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(outcome.searched_shards, vec![0]);
    assert!(outcome.failed_shards.is_empty());
    assert_eq!(outcome.snapshot_version, 1);

    // m = 2 sees everything, still best-first.
    let outcome = coordinator
        .search(&SearchRequest::new(vec![1.0, 1.0, 1.0], 3).with_shards(2))
        .await
        .unwrap();
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
    assert_eq!(outcome.results[0].shard_id, 1);
}

#[tokio::test]
async fn test_cosine_and_inner_product_order_descending() {
    let coordinator = local_coordinator(&[&[1.0, 0.0], &[0.0, 1.0]]);
    coordinator
        .set_centroids(centroid_map(&[&[1.0, 0.0], &[0.0, 1.0]]))
        .await
        .unwrap();

    coordinator.put(Record::new("x", vec![1.0, 0.0])).await.unwrap();
    coordinator.put(Record::new("y", vec![0.0, 3.0])).await.unwrap();
    coordinator.put(Record::new("xy", vec![1.0, 1.0])).await.unwrap();

    let request = SearchRequest::new(vec![1.0, 0.1], 3)
        .with_shards(2)
        .with_metric(DistanceMetric::Cosine);
    let outcome = coordinator.search(&request).await.unwrap();
    assert_eq!(outcome.results[0].id, "x");
    assert!(outcome.results[0].score >= outcome.results[1].score);
    assert!(outcome.results[1].score >= outcome.results[2].score);

    let request = SearchRequest::new(vec![0.0, 1.0], 1)
        .with_shards(2)
        .with_metric(DistanceMetric::InnerProduct);
    let outcome = coordinator.search(&request).await.unwrap();
    assert_eq!(outcome.results[0].id, "y");
    assert_eq!(outcome.results[0].score, 3.0);
}

#[tokio::test]
async fn test_validation_errors_have_no_side_effects() {
    let coordinator = local_coordinator(&[&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]]);

    // No snapshot yet.
    let err = coordinator
        .search(&SearchRequest::new(vec![0.0, 0.0, 0.0], 1))
        .await
        .unwrap_err();
    assert_eq!(err, VecShardError::EmptySnapshot);

    coordinator
        .set_centroids(centroid_map(&[&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]]))
        .await
        .unwrap();

    let err = coordinator.put(Record::new("short", vec![0.0, 0.0])).await.unwrap_err();
    assert!(err.is_validation());
    assert!(coordinator.placement().is_empty());

    let err = coordinator
        .search(&SearchRequest::new(vec![0.0; 4], 1))
        .await
        .unwrap_err();
    assert_eq!(err, VecShardError::DimensionMismatch { expected: 3, actual: 4 });

    let err = coordinator
        .search(&SearchRequest::new(vec![0.0; 3], 1).with_shards(0))
        .await
        .unwrap_err();
    assert!(matches!(err, VecShardError::InvalidArgument(_)));

    let err = coordinator
        .search(&SearchRequest::new(vec![0.0; 3], 0))
        .await
        .unwrap_err();
    assert!(matches!(err, VecShardError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_shards_to_search_clamped() {
    let coordinator = local_coordinator(&[&[0.0], &[1.0]]);
    coordinator
        .set_centroids(centroid_map(&[&[0.0], &[1.0]]))
        .await
        .unwrap();

    let outcome = coordinator
        .search(&SearchRequest::new(vec![0.3], 10).with_shards(99))
        .await
        .unwrap();
    assert_eq!(outcome.searched_shards, vec![0, 1]);
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn test_snapshot_replace_changes_routing_not_placement() {
    let coordinator = local_coordinator(&[&[0.0], &[10.0]]);
    coordinator.set_centroids(centroid_map(&[&[0.0], &[10.0]])).await.unwrap();

    assert_eq!(coordinator.put(Record::new("p", vec![1.0])).await.unwrap(), 0);

    // Swap centroids: 1.0 is now closest to shard 1.
    coordinator.set_centroids(centroid_map(&[&[10.0], &[0.0]])).await.unwrap();
    assert_eq!(coordinator.index().version(), 2);
    assert_eq!(coordinator.put(Record::new("q", vec![1.0])).await.unwrap(), 1);

    // The earlier record was not migrated.
    let found = coordinator.get("p").await.unwrap().unwrap();
    assert_eq!(found.found_in, 0);

    // A single-shard search now only sees shard 1.
    let outcome = coordinator
        .search(&SearchRequest::new(vec![1.0], 5))
        .await
        .unwrap();
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["q"]);
    assert_eq!(outcome.snapshot_version, 2);
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn test_partial_failure_returns_remaining_results() {
    let healthy_0 = Arc::new(LocalShard::new(0, 2));
    let healthy_2 = Arc::new(LocalShard::new(2, 2));
    healthy_0.insert(Record::new("near", vec![0.0, 0.0])).unwrap();
    healthy_2.insert(Record::new("far", vec![2.0, 2.0])).unwrap();

    let engine = engine_over(
        vec![
            healthy_0 as Arc<dyn ShardClient>,
            Arc::new(BrokenShard { id: 1 }),
            healthy_2,
        ],
        vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]],
        Duration::from_secs(1),
    );

    let outcome = engine
        .search(&SearchRequest::new(vec![0.0, 0.0], 5).with_shards(3))
        .await
        .unwrap();

    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["near", "far"]);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.failed_shards.len(), 1);
    assert_eq!(outcome.failed_shards[0].shard_id, 1);
    assert_eq!(outcome.responding_shards(), 2);
}

#[tokio::test]
async fn test_write_to_broken_shard_is_unavailable() {
    let clients: Vec<Arc<dyn ShardClient>> = vec![
        Arc::new(LocalShard::new(0, 1)),
        Arc::new(BrokenShard { id: 1 }),
    ];
    let coordinator = ShardCoordinator::new(
        CoordinatorConfig::new(1),
        Arc::new(ShardDirectory::new(clients).unwrap()),
        Arc::new(PlacementMap::in_memory()),
        CentroidTrainer::default(),
    );
    coordinator.set_centroids(centroid_map(&[&[0.0], &[1.0]])).await.unwrap();

    let err = coordinator.put(Record::new("r", vec![0.9])).await.unwrap_err();
    assert!(matches!(err, VecShardError::ShardUnavailable { shard_id: 1, .. }));
    assert!(coordinator.placement().lookup("r").is_none());
}

#[tokio::test]
async fn test_slow_shard_times_out() {
    let fast = Arc::new(LocalShard::new(0, 1));
    fast.insert(Record::new("fast", vec![0.0])).unwrap();
    let slow = Arc::new(SlowShard::new(1, 1, Duration::from_secs(10)));
    slow.inner.insert(Record::new("slow", vec![1.0])).unwrap();

    let engine = engine_over(
        vec![fast as Arc<dyn ShardClient>, slow.clone()],
        vec![vec![0.0], vec![1.0]],
        Duration::from_millis(50),
    );

    let started = Instant::now();
    let outcome = engine
        .search(&SearchRequest::new(vec![0.0], 5).with_shards(2))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, "fast");
    assert_eq!(outcome.failed_shards[0].shard_id, 1);
    assert!(outcome.failed_shards[0].reason.contains("timed out"));
    assert_eq!(slow.completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dropping_query_cancels_shard_calls() {
    let slow_0 = Arc::new(SlowShard::new(0, 1, Duration::from_secs(10)));
    let slow_1 = Arc::new(SlowShard::new(1, 1, Duration::from_secs(10)));

    let engine = engine_over(
        vec![slow_0.clone() as Arc<dyn ShardClient>, slow_1.clone()],
        vec![vec![0.0], vec![1.0]],
        Duration::from_secs(30),
    );

    // The caller gives up long before the shards answer.
    let request = SearchRequest::new(vec![0.5], 5).with_shards(2);
    let abandoned = tokio::time::timeout(Duration::from_millis(50), engine.search(&request)).await;
    assert!(abandoned.is_err());

    for shard in [&slow_0, &slow_1] {
        assert_eq!(shard.started.load(Ordering::SeqCst), 1);
        assert_eq!(shard.completed.load(Ordering::SeqCst), 0);
        assert!(shard.dropped.load(Ordering::SeqCst));
    }
}

#[tokio::test]
async fn test_concurrent_searches_during_snapshot_swaps() {
    let coordinator = Arc::new(local_coordinator(&[&[0.0], &[1.0]]));
    coordinator.set_centroids(centroid_map(&[&[0.0], &[1.0]])).await.unwrap();
    for i in 0..20 {
        coordinator
            .put(Record::new(format!("r{}", i), vec![i as f32 / 20.0]))
            .await
            .unwrap();
    }

    let searcher = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            for _ in 0..200 {
                let outcome = coordinator
                    .search(&SearchRequest::new(vec![0.5], 3).with_shards(2))
                    .await
                    .unwrap();
                assert_eq!(outcome.results.len(), 3);
                assert_eq!(outcome.searched_shards.len(), 2);
            }
        })
    };

    for flip in 0..50 {
        let map = if flip % 2 == 0 {
            centroid_map(&[&[1.0], &[0.0]])
        } else {
            centroid_map(&[&[0.0], &[1.0]])
        };
        coordinator.set_centroids(map).await.unwrap();
        tokio::task::yield_now().await;
    }

    searcher.await.unwrap();
    assert_eq!(coordinator.index().version(), 51);
}
