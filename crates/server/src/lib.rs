//! Parley coordination server
//!
//! Tracks who is reachable, relays chat messages and typing notices, and
//! drives call signaling (ringing, active, ended) including the pass-through
//! of session descriptions and connectivity candidates.

pub mod calls;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod store;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{AppState, ServerConfig, StoreBackend};
use hub::Hub;
use store::{MemoryStore, SqliteStore};

/// Connect the persistence collaborator named by `config`.
/// Failing to reach it is fatal.
pub async fn build_hub(config: &ServerConfig) -> anyhow::Result<Hub> {
    match &config.store {
        StoreBackend::Sqlite { url } => {
            let store = SqliteStore::connect(url)
                .await
                .context("Persistence store unreachable")?;
            Ok(Hub::with_store(Arc::new(store)))
        }
        StoreBackend::Memory => {
            info!("Using in-memory store; nothing will survive a restart");
            Ok(Hub::with_store(Arc::new(MemoryStore::new())))
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Parley Server ===");

    config.ensure_dirs()?;
    info!("Data directory: {:?}", config.data_root);

    let hub = Arc::new(build_hub(&config).await?);
    info!("Hub initialized");

    let addr = config.bind_addr();
    let app = handlers::router(AppState {
        config: config.clone(),
        hub,
    })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {} (ws: /ws)", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
