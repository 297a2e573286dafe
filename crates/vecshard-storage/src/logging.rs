//! Structured logging for vecshard.
//!
//! This module provides centralized logging configuration using the `tracing` crate.
//! Logs can be configured via the `VECSHARD_LOG` environment variable.
//!
//! # Environment Variables
//!
//! - `VECSHARD_LOG=info` - Default log level (info)
//! - `VECSHARD_LOG=debug` - Verbose logging
//! - `VECSHARD_LOG=vecshard_storage::sharding=debug` - Module-specific logging
//! - `VECSHARD_LOG=warn,vecshard_storage::vector_index=debug` - Combined filters
//!
//! # Example
//!
//! ```ignore
//! use vecshard_storage::logging;
//!
//! // Initialize logging (call once at startup)
//! logging::init();
//!
//! // Or from the [logging] section of the configuration
//! logging::init_from_config(&config.logging);
//! ```

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "VECSHARD_LOG";

/// Initializes the global tracing subscriber with default settings.
///
/// Uses the `VECSHARD_LOG` environment variable for configuration.
/// Default level is `info` if not specified.
///
/// Subsequent calls are ignored (tracing only allows one subscriber).
pub fn init() {
    init_with_default("info");
}

/// Initializes the global tracing subscriber with a custom default level.
///
/// `default_level` applies only when `VECSHARD_LOG` is not set.
pub fn init_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    // Try to set the global default - ignore if already set
    let _ = subscriber.try_init();
}

/// Initializes logging with JSON output format.
///
/// Useful for production environments where logs are processed by log aggregators.
pub fn init_json() {
    init_json_with_default("info");
}

fn init_json_with_default(default_level: &str) {
    let subscriber = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .json();

    let _ = subscriber.try_init();
}

/// Initializes logging from the `[logging]` configuration section.
pub fn init_from_config(config: &LoggingConfig) {
    if config.json {
        init_json_with_default(&config.level);
    } else {
        init_with_default(&config.level);
    }
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}
