//! Relay server binary.
//!
//! Opens the engine (fatal on failure), binds the listener, serves until a
//! shutdown signal drains the server, then flushes the engine snapshot.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alder::auth::TokenSet;
use alder::config::ServerConfig;
use alder::engine::memory::MemoryEngine;
use alder::server;
use alder::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::parse();

    let engine = MemoryEngine::open(config.data_path.as_deref())
        .context("failed to open engine")?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        addr = %addr,
        database_id = %config.database_id,
        data_path = ?config.data_path,
        "relay listening"
    );

    let state = AppState::new(Arc::new(engine.clone()), TokenSet::new(), config);
    server::serve(listener, state).await?;

    engine.flush().context("failed to flush engine snapshot")?;
    info!("shut down cleanly");
    Ok(())
}

/// Route `tracing` output to stderr, filtered by `RUST_LOG` (default
/// `info`).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}
