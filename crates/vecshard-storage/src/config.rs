//! Unified configuration for vecshard.
//!
//! This module provides centralized configuration management with support for:
//! - Default values (embedded in binary)
//! - Configuration files (TOML format)
//! - Environment variable overrides (prefix: `VECSHARD__`)
//!
//! # Environment Variables
//!
//! Scalar settings can be overridden using environment variables with the
//! `VECSHARD__` prefix:
//! - `VECSHARD__CLUSTER__DIMENSION=768`
//! - `VECSHARD__QUERY__SHARD_TIMEOUT_MS=500`
//! - `VECSHARD__TRAINING__SEED=7`
//! - `VECSHARD__SERVER__ROUTER_BIND=0.0.0.0:8000`
//!
//! The shard table is only configurable through the file.
//!
//! # Example
//!
//! ```toml
//! [cluster]
//! dimension = 3
//! default_metric = "l2"
//!
//! [[cluster.shards]]
//! id = 0
//! backend = { type = "http", url = "http://127.0.0.1:8001" }
//!
//! [[cluster.shards]]
//! id = 1
//! backend = { type = "file", path = "data/shard_1.log" }
//! ```

use crate::vector_index::DistanceMetric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vecshard_core::ShardId;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration for vecshard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VecShardConfig {
    /// Dimension, metric and shard table
    pub cluster: ClusterConfig,
    /// Fan-out query defaults
    pub query: QueryConfig,
    /// Id placement log
    pub placement: PlacementConfig,
    /// Centroid training
    pub training: TrainingSettings,
    /// Embedding provider
    pub embedding: EmbeddingConfig,
    /// HTTP bind addresses
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl VecShardConfig {
    /// Loads configuration from an optional file path with environment variable overrides.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (VECSHARD__*)
    /// 2. Configuration file (if provided)
    /// 3. Built-in defaults
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(file_path) = path {
            if Path::new(file_path).exists() {
                let contents = std::fs::read_to_string(file_path)?;
                config = toml::from_str(&contents)?;
            } else {
                tracing::warn!(path = file_path, "Configuration file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        // Cluster overrides
        if let Some(v) = env_parse("VECSHARD__CLUSTER__DIMENSION") {
            self.cluster.dimension = v;
        }
        if let Some(v) = env_parse("VECSHARD__CLUSTER__DEFAULT_METRIC") {
            self.cluster.default_metric = v;
        }

        // Query overrides
        if let Some(v) = env_parse("VECSHARD__QUERY__SHARD_TIMEOUT_MS") {
            self.query.shard_timeout_ms = v;
        }
        if let Some(v) = env_parse("VECSHARD__QUERY__DEFAULT_TOP_K") {
            self.query.default_top_k = v;
        }
        if let Some(v) = env_parse("VECSHARD__QUERY__DEFAULT_SHARDS_TO_SEARCH") {
            self.query.default_shards_to_search = v;
        }

        // Placement overrides
        if let Ok(val) = std::env::var("VECSHARD__PLACEMENT__LOG_PATH") {
            self.placement.log_path = Some(PathBuf::from(val));
        }

        // Training overrides
        if let Some(v) = env_parse("VECSHARD__TRAINING__SEED") {
            self.training.seed = v;
        }
        if let Some(v) = env_parse("VECSHARD__TRAINING__MAX_ITERATIONS") {
            self.training.max_iterations = v;
        }
        if let Some(v) = env_parse("VECSHARD__TRAINING__SAMPLE_FRACTION") {
            self.training.sample_fraction = v;
        }
        if let Some(v) = env_parse("VECSHARD__TRAINING__MAX_SAMPLES") {
            self.training.max_samples = v;
        }
        if let Ok(val) = std::env::var("VECSHARD__TRAINING__SNAPSHOT_PATH") {
            self.training.snapshot_path = Some(PathBuf::from(val));
        }

        // Embedding overrides
        if let Ok(val) = std::env::var("VECSHARD__EMBEDDING__BASE_URL") {
            self.embedding.base_url = val;
        }
        if let Ok(val) = std::env::var("VECSHARD__EMBEDDING__MODEL") {
            self.embedding.model = val;
        }
        if let Ok(val) = std::env::var("VECSHARD__EMBEDDING__API_KEY") {
            self.embedding.api_key = Some(val);
        }

        // Server overrides
        if let Ok(val) = std::env::var("VECSHARD__SERVER__ROUTER_BIND") {
            self.server.router_bind = val;
        }
        if let Ok(val) = std::env::var("VECSHARD__SERVER__SHARD_BIND") {
            self.server.shard_bind = val;
        }
        if let Ok(val) = std::env::var("VECSHARD__SERVER__SHARD_DATA_DIR") {
            self.server.shard_data_dir = Some(PathBuf::from(val));
        }

        // Logging overrides
        if let Ok(val) = std::env::var("VECSHARD__LOGGING__LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("VECSHARD__LOGGING__JSON") {
            self.logging.json = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.dimension == 0 {
            return Err(ConfigError::Invalid("cluster.dimension must be > 0".into()));
        }
        if self.cluster.shards.is_empty() {
            return Err(ConfigError::Invalid("cluster.shards must not be empty".into()));
        }
        let mut ids: Vec<ShardId> = self.cluster.shards.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        for (expected, id) in ids.iter().enumerate() {
            if *id as usize != expected {
                return Err(ConfigError::Invalid(format!(
                    "shard ids must be exactly 0..{}, found {:?}",
                    ids.len(),
                    ids
                )));
            }
        }
        if self.query.shard_timeout_ms == 0 {
            return Err(ConfigError::Invalid("query.shard_timeout_ms must be > 0".into()));
        }
        if self.query.default_top_k == 0 || self.query.default_shards_to_search == 0 {
            return Err(ConfigError::Invalid(
                "query defaults must be at least 1".into(),
            ));
        }
        let fraction = self.training.sample_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "training.sample_fraction must be in (0, 1], got {}",
                fraction
            )));
        }
        Ok(())
    }

    /// Returns the number of shards `N`.
    pub fn num_shards(&self) -> usize {
        self.cluster.shards.len()
    }

    /// Returns the shard entry for `shard_id`.
    pub fn shard(&self, shard_id: ShardId) -> Option<&ShardEntry> {
        self.cluster.shards.iter().find(|s| s.id == shard_id)
    }

    /// Serializes the configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|val| val.parse().ok())
}

/// Cluster shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Vector dimension `D`
    pub dimension: usize,
    /// Metric used when a query does not name one
    pub default_metric: DistanceMetric,
    /// Shard table; ids must be `0..N`
    pub shards: Vec<ShardEntry>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            dimension: 3,
            default_metric: DistanceMetric::L2,
            shards: (0..2)
                .map(|id| ShardEntry {
                    id,
                    backend: ShardBackend::Memory,
                })
                .collect(),
        }
    }
}

/// One row of the shard table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardEntry {
    /// Shard identifier
    pub id: ShardId,
    /// Where the shard's records live
    pub backend: ShardBackend,
}

/// Storage backend of a shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShardBackend {
    /// In-process, memory only
    Memory,
    /// In-process, replayed from an append-only record log
    File { path: PathBuf },
    /// Remote shard server
    Http { url: String },
}

/// Fan-out query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Per-shard request timeout in milliseconds
    pub shard_timeout_ms: u64,
    /// Results returned when a request does not say
    pub default_top_k: usize,
    /// Shards searched when a request does not say
    pub default_shards_to_search: usize,
}

impl QueryConfig {
    /// Returns the per-shard timeout.
    pub fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            shard_timeout_ms: 2_000,
            default_top_k: 5,
            default_shards_to_search: 1,
        }
    }
}

/// Placement map configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Append-only log of `id → shard` entries (None = memory only)
    pub log_path: Option<PathBuf>,
}

/// Centroid training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// RNG seed for initialization, reseeding and sampling
    pub seed: u64,
    /// Upper bound on Lloyd iterations
    pub max_iterations: usize,
    /// Stop when no centroid moves farther than this
    pub tolerance: f32,
    /// Fraction of stored vectors sampled for retraining
    pub sample_fraction: f64,
    /// Hard cap on the retraining sample
    pub max_samples: usize,
    /// Where the active snapshot is saved (None = not persisted)
    pub snapshot_path: Option<PathBuf>,
    /// Previous snapshot files kept next to `snapshot_path`
    pub snapshot_backups: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            max_iterations: 50,
            tolerance: 1e-4,
            sample_fraction: 0.1,
            max_samples: 100_000,
            snapshot_path: None,
            snapshot_backups: 3,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible base URL (Ollama: http://localhost:11434/v1)
    pub base_url: String,
    /// Embedding model name
    pub model: String,
    /// Bearer token, if the provider needs one
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
        }
    }
}

/// HTTP bind addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Router API address
    pub router_bind: String,
    /// Shard server address
    pub shard_bind: String,
    /// Directory for the record log of a served shard; memory only when unset
    pub shard_data_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Returns the record log path a shard server should use, if any.
    pub fn shard_log_path(&self, shard_id: ShardId) -> Option<PathBuf> {
        self.shard_data_dir
            .as_ref()
            .map(|dir| dir.join(format!("shard_{}.log", shard_id)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            router_bind: "127.0.0.1:8000".to_string(),
            shard_bind: "127.0.0.1:8001".to_string(),
            shard_data_dir: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Use JSON format for log output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
