//! # vecshard CLI
//!
//! Runs the router and shard servers of a centroid-routed vector store.
//!
//! ## Usage
//!
//! ```bash
//! # Router API (reads the shard table from the config)
//! vecshard serve-router vecshard.toml
//!
//! # One shard server
//! vecshard serve-shard 0 vecshard.toml
//!
//! # Effective configuration after env overrides
//! vecshard print-config vecshard.toml
//!
//! # Embed a text with the configured provider
//! vecshard embed "hello world" vecshard.toml
//! ```

mod server;

use colored::Colorize;
use std::sync::Arc;
use vecshard_core::ShardId;
use vecshard_storage::config::{ShardBackend, VecShardConfig};
use vecshard_storage::embed::{Embedder, HttpEmbedder};
use vecshard_storage::logging;
use vecshard_storage::sharding::ShardCoordinator;
use vecshard_storage::vector_index::{serve_shard, LocalShard};

type CliResult = Result<(), Box<dyn std::error::Error>>;

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let result = match args.get(1).map(|s| s.as_str()) {
        Some("serve-router") => run_router(args.get(2).map(|s| s.as_str())),
        Some("serve-shard") => match args.get(2).and_then(|s| s.parse::<ShardId>().ok()) {
            Some(shard_id) => run_shard(shard_id, args.get(3).map(|s| s.as_str())),
            None => {
                eprintln!("{}: serve-shard needs a numeric <SHARD_ID>\n", "Error".red());
                print_help();
                std::process::exit(2);
            }
        },
        Some("print-config") => print_config(args.get(2).map(|s| s.as_str())),
        Some("embed") => match args.get(2) {
            Some(text) => run_embed(text, args.get(3).map(|s| s.as_str())),
            None => {
                eprintln!("{}: embed needs a <TEXT> argument\n", "Error".red());
                print_help();
                std::process::exit(2);
            }
        },
        Some("--help") | Some("-h") | None => {
            print_help();
            Ok(())
        }
        Some(other) => {
            eprintln!("{}: unknown command '{}'\n", "Error".red(), other);
            print_help();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

fn print_help() {
    println!("{}", format!("vecshard v{}", env!("CARGO_PKG_VERSION")).bold().cyan());
    println!("Centroid-routed sharded vector search\n");
    println!("USAGE:");
    println!("    vecshard <COMMAND> [ARGS]\n");
    println!("COMMANDS:");
    println!("    serve-router [CONFIG]             Start the router API");
    println!("    serve-shard <SHARD_ID> [CONFIG]   Start one shard server");
    println!("    print-config [CONFIG]             Print the effective configuration");
    println!("    embed <TEXT> [CONFIG]             Print the embedding of TEXT as JSON");
    println!("    --help, -h                        Show this help\n");
    println!("ENVIRONMENT:");
    println!("    VECSHARD_LOG                      Log filter (e.g. info, vecshard_storage=debug)");
    println!("    VECSHARD__SECTION__KEY            Override a config value");
}

/// Loads the configuration and installs the subscriber it describes.
fn load(path: Option<&str>) -> Result<VecShardConfig, Box<dyn std::error::Error>> {
    if let Some(p) = path {
        if !std::path::Path::new(p).exists() {
            eprintln!("{} Config file {} not found, using defaults", "⚠".yellow(), p);
        }
    }
    let config = VecShardConfig::load(path)?;
    logging::init_from_config(&config.logging);
    Ok(config)
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}

// =============================================================================
// Commands
// =============================================================================

fn run_router(config_path: Option<&str>) -> CliResult {
    let config = load(config_path)?;

    runtime()?.block_on(async {
        let coordinator = Arc::new(ShardCoordinator::from_config(&config)?);
        let listener = tokio::net::TcpListener::bind(&config.server.router_bind).await?;

        println!(
            "{} Router running at http://{}",
            "✓".green(),
            listener.local_addr()?
        );
        println!("   Shards: {}", config.num_shards());
        println!("   Dimension: {}", config.cluster.dimension);
        match coordinator.index().version() {
            0 => println!("   Centroids: none (POST /set_centroids or /retrain)"),
            v => println!("   Centroids: version {}", v),
        }
        println!("   Press Ctrl+C to stop\n");

        server::serve_router(coordinator, listener, server::shutdown_signal()).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

fn run_shard(shard_id: ShardId, config_path: Option<&str>) -> CliResult {
    let config = load(config_path)?;
    if shard_id as usize >= config.num_shards() {
        return Err(format!(
            "shard {} is not in the configured shard table (0..{})",
            shard_id,
            config.num_shards()
        )
        .into());
    }

    // A shard configured as file-backed serves that file; otherwise the
    // server data dir decides.
    let log_path = match config.shard(shard_id).map(|entry| &entry.backend) {
        Some(ShardBackend::File { path }) => Some(path.clone()),
        _ => config.server.shard_log_path(shard_id),
    };
    let shard = match &log_path {
        Some(path) => LocalShard::open(shard_id, config.cluster.dimension, path)?,
        None => LocalShard::new(shard_id, config.cluster.dimension),
    };
    let shard = Arc::new(shard);

    runtime()?.block_on(async {
        let listener = tokio::net::TcpListener::bind(&config.server.shard_bind).await?;
        println!(
            "{} Shard {} running at http://{}",
            "✓".green(),
            shard_id,
            listener.local_addr()?
        );
        match &log_path {
            Some(path) => println!("   Record log: {} ({} records)", path.display(), shard.len()),
            None => println!("   Storage: memory only"),
        }
        println!("   Press Ctrl+C to stop\n");

        serve_shard(shard, listener, server::shutdown_signal()).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

fn print_config(config_path: Option<&str>) -> CliResult {
    let config = load(config_path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

fn run_embed(text: &str, config_path: Option<&str>) -> CliResult {
    let config = load(config_path)?;
    let embedder = HttpEmbedder::from_config(&config.embedding, config.cluster.dimension);

    let vector = runtime()?.block_on(embedder.embed(text))?;
    println!("{}", serde_json::to_string(&vector)?);
    Ok(())
}
