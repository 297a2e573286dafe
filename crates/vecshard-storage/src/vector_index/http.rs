//! HTTP client for remote shard servers.
//!
//! Speaks the JSON API served by [`super::server::shard_router`]. Connection
//! pooling comes from the shared `reqwest::Client`; the fan-out engine applies
//! its own per-request timeout on top of the client-level one.

use super::client::{ShardClient, ShardClientError, ShardResult};
use super::metric::DistanceMetric;
use super::server::{ErrorBody, ListIdsResponse, SearchBody, SearchResponse, StoreResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::BTreeSet;
use std::time::Duration;
use vecshard_core::{Record, ResultItem, ShardId};

/// Client for one remote shard.
#[derive(Debug, Clone)]
pub struct HttpShardClient {
    shard_id: ShardId,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpShardClient {
    /// Creates a client for the shard server at `base_url`.
    ///
    /// `timeout` bounds every request issued by this client.
    pub fn new(shard_id: ShardId, base_url: impl Into<String>, timeout: Duration) -> ShardResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            shard_id,
            base_url,
            timeout,
            client,
        })
    }

    /// Returns the server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_send_error(&self, err: reqwest::Error) -> ShardClientError {
        if err.is_timeout() {
            ShardClientError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_connect() {
            ShardClientError::ConnectionFailed {
                addr: self.base_url.clone(),
                message: err.to_string(),
            }
        } else {
            ShardClientError::Http(err)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ShardResult<reqwest::Response> {
        request.send().await.map_err(|e| self.map_send_error(e))
    }

    /// Turns a non-success response into the matching error.
    async fn check(response: reqwest::Response) -> ShardResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        if status == StatusCode::BAD_REQUEST {
            Err(ShardClientError::Rejected(message))
        } else {
            Err(ShardClientError::ServerError {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ShardClient for HttpShardClient {
    fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    async fn store(&self, record: Record) -> ShardResult<()> {
        let response = self.send(self.client.post(self.url("/store")).json(&record)).await?;
        let body: StoreResponse = Self::check(response).await?.json().await?;
        tracing::trace!(shard_id = self.shard_id, id = %body.id, "Stored on remote shard");
        Ok(())
    }

    async fn fetch(&self, id: &str) -> ShardResult<Option<Record>> {
        // Ids are caller-supplied; keep them from breaking the path.
        let path = format!("/get/{}", encode_path_segment(id));
        let response = self.send(self.client.get(self.url(&path))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: Record = Self::check(response).await?.json().await?;
        Ok(Some(record))
    }

    async fn local_search(
        &self,
        query: &[f32],
        top_k: usize,
        metric: DistanceMetric,
    ) -> ShardResult<Vec<ResultItem>> {
        let body = SearchBody {
            query_vector: query.to_vec(),
            top_k,
            metric,
        };
        let response = self.send(self.client.post(self.url("/search")).json(&body)).await?;
        let body: SearchResponse = Self::check(response).await?.json().await?;
        Ok(body.results)
    }

    async fn list_ids(&self) -> ShardResult<BTreeSet<String>> {
        let response = self.send(self.client.get(self.url("/list_ids"))).await?;
        let body: ListIdsResponse = Self::check(response).await?.json().await?;
        Ok(body.ids.into_iter().collect())
    }
}

/// Percent-encodes everything outside the URL path unreserved set.
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
