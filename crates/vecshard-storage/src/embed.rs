//! Embedding provider client.
//!
//! Turns text into vectors through an OpenAI-compatible `/embeddings`
//! endpoint (OpenAI, Ollama's `/v1` API, most local gateways). The router
//! core never calls this; it only ever sees vectors.

use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use thiserror::Error;
use vecshard_core::Vector;

/// Errors that can occur during embedding.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error
    #[error("API error: {0}")]
    Api(String),

    /// The provider returned a vector of the wrong length
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Anything that can embed text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the embedding of `text`.
    async fn embed(&self, text: &str) -> Result<Vector>;

    /// Returns the dimension every embedding has.
    fn dimension(&self) -> usize;
}

/// Embedder backed by an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    client: reqwest::Client,
}

impl HttpEmbedder {
    /// Creates an embedder for `model` at `base_url` producing `dimension`-long vectors.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            dimension,
            client: reqwest::Client::new(),
        }
    }

    /// Creates an embedder from the `[embedding]` section.
    pub fn from_config(config: &EmbeddingConfig, dimension: usize) -> Self {
        let embedder = Self::new(config.base_url.clone(), config.model.clone(), dimension);
        match &config.api_key {
            Some(key) => embedder.with_api_key(key.clone()),
            None => embedder,
        }
    }

    /// Sets the bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({"model": self.model, "input": text});

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        let resp: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(EmbedError::Api(format!("{}: {}", status, resp)));
        }

        let vector = parse_embedding(&resp)?;
        if vector.len() != self.dimension {
            return Err(EmbedError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Extracts the vector from either response shape.
fn parse_embedding(resp: &serde_json::Value) -> Result<Vector> {
    if let Some(embedding) = resp.get("embedding") {
        // Ollama native format
        Ok(serde_json::from_value(embedding.clone())?)
    } else if let Some(data) = resp.get("data").and_then(|d| d.get(0)) {
        // OpenAI format
        Ok(serde_json::from_value(data["embedding"].clone())?)
    } else {
        Err(EmbedError::Api("No embedding in response".into()))
    }
}
