//! Filstore Daemon
//!
//! Stores opaque piece payloads under sequential ids and serves them back out
//! in their padded form over HTTP, with byte-range support.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! filstore
//!
//! # Start with custom config
//! filstore --config /path/to/config.toml
//!
//! # Start with custom store root and listen address
//! filstore --root /data/filstore --listen 0.0.0.0:9091
//! ```
//!
//! ## HTTP API
//!
//! - `GET /health` - Store summary
//! - `POST /piece` - Allocate a piece id for deal metadata
//! - `PUT /piece/{id}` - Upload the raw piece payload
//! - `GET /piece/{id}/status` - Stored deal record
//! - `GET /{type}/{id}` - Retrieve the padded piece (range-capable)
//! - `GET /{type}/{id}/{spt}/allocated/{offset}/{size}` - Probe allocation

use clap::Parser;
use filstore::{BlobStore, Config, HttpServer, IndexStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "filstore")]
#[command(about = "Piece storage and retrieval service for Filecoin devnets")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store root for the piece index and payloads
    #[arg(long, env = "FILSTORE_ROOT")]
    root: Option<PathBuf>,

    /// `[host]:port` to listen on
    #[arg(short, long, env = "FILSTORE_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("filstore=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(root) = args.root {
        config.store_root = root;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    info!(
        root = %config.store_root.display(),
        listen = %config.listen,
        "Starting filstore"
    );

    // Ensure the store root exists
    tokio::fs::create_dir_all(&config.store_root).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    // Initialize the piece index and payload store
    let index = Arc::new(IndexStore::open(&config.store_root).await?);
    let blobs = Arc::new(BlobStore::new(&config.store_root).await?);

    let addr: SocketAddr = config.listen.parse()?;
    let server = Arc::new(HttpServer::new(index.clone(), blobs.clone(), addr));

    info!("HTTP API available at http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /health                - Store summary");
    info!("  POST /piece                 - Allocate a piece id");
    info!("  PUT  /piece/{{id}}            - Upload piece payload");
    info!("  GET  /piece/{{id}}/status     - Piece deal status");
    info!("  GET  /{{type}}/{{id}}           - Retrieve padded piece (range-capable)");
    info!("  GET  /{{type}}/{{id}}/{{spt}}/allocated/{{offset}}/{{size}} - Probe allocation");

    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    // Flush the index and print stats before exit
    if let Err(e) = index.flush().await {
        error!(error = %e, "Failed to flush piece index");
    }
    let summary = index.summary().await;
    info!(
        pieces = summary.next_id,
        ready = summary.ready,
        pending = summary.pending,
        "Final store stats"
    );

    Ok(())
}
