//! asset-server - content-addressed image ingest over HTTP.
//!
//! Accepts a single image per request on `POST /api/upload`, stores the
//! original plus a configured fan-out of resized variants under the
//! payload's content digest, and answers repeated uploads of the same
//! bytes from storage.
//!
//! # Usage
//!
//! ```bash
//! asset-server --config-file asset-server.conf
//! ```
//!
//! The HTTP side runs on a single-threaded reactor; all decode, resize,
//! encode and hashing work happens on a dedicated worker pool sized by
//! `thread_pool_size`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use asset_core::{Config, DedupRegistry, PipelineContext, WorkerPool};

mod http;
mod logging;
mod server;

#[cfg(test)]
mod tests;

/// Content-addressed image ingest server.
#[derive(Parser, Debug)]
#[command(name = "asset-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "asset-server.conf")]
    config_file: PathBuf,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    tracing::debug!("asset-server v{}", asset_core::VERSION);

    let config = Config::load(&cli.config_file)
        .with_context(|| format!("loading config from {}", cli.config_file.display()))?;
    let config = Arc::new(config);

    let storage = asset_core::storage::create(&config.storage);
    storage.init().context("initializing storage backend")?;

    let pool = Arc::new(WorkerPool::new(config.thread_pool_size()));
    let ctx = PipelineContext {
        config,
        storage,
        pool: Arc::clone(&pool),
        registry: Arc::new(DedupRegistry::new()),
    };

    let result = server::run(ctx).await;

    pool.shutdown();
    result
}
