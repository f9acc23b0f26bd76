//! backstage server entry point.
//!
//! Boots the interception layer and serves it as an MCP server on stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use backstage_client::{FetchConfig, HttpNetwork, InterceptionLayer};
use backstage_core::{AppConfig, CacheDb, PrecacheManifest};

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let db = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening cache store {}", config.db_path.display()))?;
    let network = Arc::new(HttpNetwork::new(FetchConfig::from(&config))?);
    let layer = Arc::new(InterceptionLayer::new(db, network, &config).await?);

    log_lifecycle_events(&layer);

    if let Some(path) = &config.precache_manifest {
        let manifest = PrecacheManifest::load(path)?;
        match layer.install(&manifest, config.version.as_deref()).await {
            Ok(state) => tracing::info!(state = %state, "startup manifest installed"),
            Err(e) => tracing::warn!("startup install failed, keeping previous version: {e}"),
        }
    }

    tracing::info!(origin = %config.origin, "Starting backstage server on stdio transport");

    let server = serve_server(handler::BackstageServer::new(layer.clone()), stdio()).await?;
    server.waiting().await?;

    layer.settle().await;

    Ok(())
}

fn log_lifecycle_events(layer: &InterceptionLayer) {
    let mut events = layer.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(event = ?event, "lifecycle event"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "lifecycle events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
