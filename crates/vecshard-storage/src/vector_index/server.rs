//! HTTP server for vector operations on a single shard.
//!
//! Wraps a [`LocalShard`] and exposes it as a small JSON API that
//! [`super::http::HttpShardClient`] talks to.
//!
//! # Routes
//!
//! - `GET /`: shard status (id, record count, dimension)
//! - `POST /store`: upsert a record
//! - `GET /get/{id}`: fetch a record, 404 when absent
//! - `POST /search`: local top-k under a metric
//! - `GET /list_ids`: every stored id
//!
//! Wrong-dimension vectors are rejected with 400.

use super::client::ShardClientError;
use super::local::LocalShard;
use super::metric::DistanceMetric;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vecshard_core::{Record, ResultItem, ShardId};

// =============================================================================
// Wire types
// =============================================================================

/// Body of `POST /search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchBody {
    pub query_vector: Vec<f32>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
}

fn default_top_k() -> usize {
    5
}

/// Response of `POST /search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ResultItem>,
}

/// Response of `POST /store`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub status: String,
    pub id: String,
    pub shard: ShardId,
}

/// Response of `GET /list_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListIdsResponse {
    pub count: usize,
    pub ids: Vec<String>,
    pub shard: ShardId,
}

/// Response of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardStatus {
    pub status: String,
    pub shard: ShardId,
    pub count: usize,
    pub dimension: usize,
    pub persistent: bool,
}

/// Error body returned with every non-success status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Maps a shard error onto an HTTP response.
struct ApiError(ShardClientError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ShardClientError::Rejected(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ShardClientError> for ApiError {
    fn from(err: ShardClientError) -> Self {
        ApiError(err)
    }
}

// =============================================================================
// Router
// =============================================================================

/// Builds the axum router for one shard.
pub fn shard_router(shard: Arc<LocalShard>) -> Router {
    Router::new()
        .route("/", get(handle_status))
        .route("/store", post(handle_store))
        .route("/get/{id}", get(handle_get))
        .route("/search", post(handle_search))
        .route("/list_ids", get(handle_list_ids))
        .with_state(shard)
}

/// Serves the shard on `listener` until `shutdown` resolves.
pub async fn serve_shard<F>(
    shard: Arc<LocalShard>,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let shard_id = shard.id();
    let addr = listener.local_addr()?;
    tracing::info!(shard_id, %addr, records = shard.len(), "Shard server listening");

    axum::serve(listener, shard_router(shard))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!(shard_id, "Shard server stopped");
    Ok(())
}

async fn handle_status(State(shard): State<Arc<LocalShard>>) -> Json<ShardStatus> {
    Json(ShardStatus {
        status: "running".to_string(),
        shard: shard.id(),
        count: shard.len(),
        dimension: shard.dimension(),
        persistent: shard.is_persistent(),
    })
}

async fn handle_store(
    State(shard): State<Arc<LocalShard>>,
    Json(record): Json<Record>,
) -> Result<Json<StoreResponse>, ApiError> {
    let id = record.id.clone();
    shard.insert(record)?;
    Ok(Json(StoreResponse {
        status: "stored".to_string(),
        id,
        shard: shard.id(),
    }))
}

async fn handle_get(
    State(shard): State<Arc<LocalShard>>,
    Path(id): Path<String>,
) -> Result<Json<Record>, (StatusCode, Json<ErrorBody>)> {
    shard.get(&id).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("id '{}' not found on shard {}", id, shard.id()),
            }),
        )
    })
}

async fn handle_search(
    State(shard): State<Arc<LocalShard>>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    let results = shard.search(&body.query_vector, body.top_k, body.metric)?;
    Ok(Json(SearchResponse { results }))
}

async fn handle_list_ids(State(shard): State<Arc<LocalShard>>) -> Json<ListIdsResponse> {
    let ids: Vec<String> = shard.ids().into_iter().collect();
    Json(ListIdsResponse {
        count: ids.len(),
        ids,
        shard: shard.id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body_defaults() {
        let body: SearchBody = serde_json::from_str(r#"{"query_vector": [1.0, 2.0]}"#).unwrap();
        assert_eq!(body.top_k, 5);
        assert_eq!(body.metric, DistanceMetric::L2);

        let body: SearchBody =
            serde_json::from_str(r#"{"query_vector": [1.0], "top_k": 2, "metric": "cosine"}"#).unwrap();
        assert_eq!(body.top_k, 2);
        assert_eq!(body.metric, DistanceMetric::Cosine);
    }

    #[test]
    fn test_rejected_maps_to_bad_request() {
        let response = ApiError(ShardClientError::Rejected("dim".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError(ShardClientError::Storage("disk".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
