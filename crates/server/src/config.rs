//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::hub::Hub;

/// Which persistence collaborator backs the hub
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite { url: String },
    /// Process-local, lost on exit
    Memory,
}

/// Configuration for the Parley server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen port on all interfaces
    pub port: u16,
    /// Data directory
    pub data_root: PathBuf,
    /// Persistence backend
    pub store: StoreBackend,
    /// Origin allowed by CORS
    pub client_origin: String,
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_root = parley_common::data_root();
        Self {
            port: 5000,
            store: StoreBackend::Sqlite {
                url: parley_common::sqlite_url(&parley_common::database_path(&data_root)),
            },
            data_root,
            client_origin: "http://localhost:3000".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PORT`, `DATABASE_URL`, `PARLEY_STORE`,
    /// `CLIENT_URL` and `RUST_LOG`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("PORT") {
            if let Some(port) = parse_port(&raw) {
                config.port = port;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.store = StoreBackend::Sqlite { url };
        }
        if std::env::var("PARLEY_STORE").map(|s| s == "memory").unwrap_or(false) {
            config.store = StoreBackend::Memory;
        }
        if let Ok(origin) = std::env::var("CLIENT_URL") {
            config.client_origin = origin;
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            config.log_filter = filter;
        }
        config
    }

    /// Config rooted at `base_dir`, with its own database file
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let data_root = base_dir.into();
        Self {
            store: StoreBackend::Sqlite {
                url: parley_common::sqlite_url(&parley_common::database_path(&data_root)),
            },
            data_root,
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Ensure the data directory exists
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        parley_common::ensure_dir(&self.data_root)
    }
}

/// A usable listen port, or `None` with a warning
fn parse_port(raw: &str) -> Option<u16> {
    match raw.trim().parse::<u16>() {
        Ok(port) => Some(port),
        Err(e) => {
            warn!("Ignoring invalid PORT {:?} ({}); using default", raw, e);
            None
        }
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub hub: Arc<Hub>,
}
