//! Router HTTP server.
//!
//! Exposes the coordinator over JSON: store, get, search, explicit centroid
//! installation and retraining.
//!
//! Run with: cargo run -p vecshard-cli --release -- serve-router vecshard.toml

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use vecshard_core::{Record, ResultItem, ShardId, VecShardError, Vector};
use vecshard_storage::sharding::{CoordinatorStatus, RetrainReport, ShardCoordinator};
use vecshard_storage::vector_index::{DistanceMetric, ShardFailure};

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreResponse {
    pub status: String,
    pub id: String,
    pub stored_in: ShardId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub id: String,
    pub vector: Vector,
    pub found_in: ShardId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequestBody {
    pub query_vector: Vector,
    pub top_k: Option<usize>,
    pub shards_to_search: Option<usize>,
    pub metric: Option<DistanceMetric>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponseBody {
    pub results: Vec<ResultItem>,
    pub searched_shards: Vec<ShardId>,
    /// Shards that failed or timed out; non-empty means degraded results.
    pub failed_shards: Vec<ShardFailure>,
    pub snapshot_version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetCentroidsBody {
    pub centroids: BTreeMap<ShardId, Vector>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetCentroidsResponse {
    pub status: String,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// Errors
// =============================================================================

/// Maps routing errors onto HTTP status codes.
struct ApiError(VecShardError);

impl From<VecShardError> for ApiError {
    fn from(err: VecShardError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VecShardError::DimensionMismatch { .. }
            | VecShardError::InvalidArgument(_)
            | VecShardError::InvalidSnapshot(_) => StatusCode::BAD_REQUEST,
            VecShardError::EmptySnapshot | VecShardError::InsufficientSamples { .. } => {
                StatusCode::CONFLICT
            }
            VecShardError::ShardUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            VecShardError::UnknownShard(_) | VecShardError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Builds the router API.
pub fn create_router(coordinator: Arc<ShardCoordinator>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/store", post(store))
        .route("/get/{id}", get(get_record))
        .route("/search", post(search))
        .route("/set_centroids", post(set_centroids))
        .route("/retrain", post(retrain))
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

async fn status(State(coordinator): State<Arc<ShardCoordinator>>) -> Json<CoordinatorStatus> {
    Json(coordinator.status())
}

async fn store(
    State(coordinator): State<Arc<ShardCoordinator>>,
    Json(record): Json<Record>,
) -> Result<Json<StoreResponse>, ApiError> {
    let id = record.id.clone();
    let stored_in = coordinator.put(record).await?;
    Ok(Json(StoreResponse {
        status: "ok".to_string(),
        id,
        stored_in,
    }))
}

async fn get_record(
    State(coordinator): State<Arc<ShardCoordinator>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match coordinator.get(&id).await? {
        Some(found) => Ok(Json(GetResponse {
            id: found.record.id,
            vector: found.record.vector,
            found_in: found.found_in,
        })
        .into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Record not found: {}", id),
            }),
        )
            .into_response()),
    }
}

async fn search(
    State(coordinator): State<Arc<ShardCoordinator>>,
    Json(body): Json<SearchRequestBody>,
) -> Result<Json<SearchResponseBody>, ApiError> {
    let request = coordinator.request(body.query_vector, body.top_k, body.shards_to_search, body.metric);
    let outcome = coordinator.search(&request).await?;
    Ok(Json(SearchResponseBody {
        results: outcome.results,
        searched_shards: outcome.searched_shards,
        failed_shards: outcome.failed_shards,
        snapshot_version: outcome.snapshot_version,
    }))
}

async fn set_centroids(
    State(coordinator): State<Arc<ShardCoordinator>>,
    Json(body): Json<SetCentroidsBody>,
) -> Result<Json<SetCentroidsResponse>, ApiError> {
    let snapshot = coordinator.set_centroids(body.centroids).await?;
    Ok(Json(SetCentroidsResponse {
        status: "ok".to_string(),
        version: snapshot.version(),
    }))
}

async fn retrain(State(coordinator): State<Arc<ShardCoordinator>>) -> Result<Json<RetrainReport>, ApiError> {
    Ok(Json(coordinator.retrain().await?))
}

// =============================================================================
// Serving
// =============================================================================

/// Serves the router API on `listener` until `shutdown` resolves.
pub async fn serve_router<F>(
    coordinator: Arc<ShardCoordinator>,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let status = coordinator.status();
    tracing::info!(
        %addr,
        shards = status.num_shards,
        dimension = status.dimension,
        snapshot_version = status.snapshot_version,
        "Router listening"
    );

    axum::serve(listener, create_router(coordinator))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Router stopped");
    Ok(())
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown signal received, draining connections");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vecshard_storage::sharding::{CentroidTrainer, CoordinatorConfig, PlacementMap, ShardDirectory};
    use vecshard_storage::vector_index::{LocalShard, ShardClient};

    async fn spawn_router() -> String {
        let clients: Vec<Arc<dyn ShardClient>> = (0..2)
            .map(|id| Arc::new(LocalShard::new(id, 3)) as Arc<dyn ShardClient>)
            .collect();
        let coordinator = Arc::new(ShardCoordinator::new(
            CoordinatorConfig::new(3),
            Arc::new(ShardDirectory::new(clients).unwrap()),
            Arc::new(PlacementMap::in_memory()),
            CentroidTrainer::default(),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve_router(coordinator, listener, std::future::pending()));
        base
    }

    #[tokio::test]
    async fn test_router_api_flow() {
        let base = spawn_router().await;
        let client = reqwest::Client::new();

        // Routing before any centroids are installed.
        let resp = client
            .post(format!("{}/store", base))
            .json(&json!({"id": "a", "vector": [0.1, 0.1, 0.1]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

        let resp: SetCentroidsResponse = client
            .post(format!("{}/set_centroids", base))
            .json(&json!({"centroids": {"0": [0.0, 0.0, 0.0], "1": [1.0, 1.0, 1.0]}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp.version, 1);

        for (id, v) in [("a", [0.1, 0.1, 0.1]), ("b", [0.9, 0.9, 0.9])] {
            let resp: StoreResponse = client
                .post(format!("{}/store", base))
                .json(&json!({"id": id, "vector": v}))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(resp.stored_in, if id == "a" { 0 } else { 1 });
        }

        let got: GetResponse = client
            .get(format!("{}/get/b", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(got.found_in, 1);

        let missing = client.get(format!("{}/get/zzz", base)).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let found: SearchResponseBody = client
            .post(format!("{}/search", base))
            .json(&json!({"query_vector": [0.8, 0.8, 0.8], "top_k": 5, "shards_to_search": 1}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(found.searched_shards, vec![1]);
        assert_eq!(found.results.len(), 1);
        assert_eq!(found.results[0].id, "b");
        assert!(found.failed_shards.is_empty());

        let bad = client
            .post(format!("{}/search", base))
            .json(&json!({"query_vector": [0.8, 0.8]}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);

        let status: CoordinatorStatus = client.get(&base).send().await.unwrap().json().await.unwrap();
        assert_eq!(status.snapshot_version, 1);
        assert_eq!(status.placed_ids, 2);
    }
}
