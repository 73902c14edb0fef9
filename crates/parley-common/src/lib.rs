//! Data directory layout for Parley
//!
//! ```text
//! parley_data/
//! └── parley.sqlite    # identities, conversations, messages
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ROOT_ENV: &str = "PARLEY_ROOT";

#[derive(Serialize, Deserialize, Debug, Default)]
struct ParleyConfig {
    data_root: Option<PathBuf>,
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("parley").join("config.json"))
}

/// Load the data root pinned in the user's config file, if any
pub fn load_persistent_root() -> Option<PathBuf> {
    let path = config_path()?;
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str::<ParleyConfig>(&content) {
            Ok(config) => config.data_root,
            Err(e) => {
                warn!("Failed to parse config file at {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read config file at {:?}: {}", path, e);
            None
        }
    }
}

/// Resolve the data root: `PARLEY_ROOT`, then the pinned config, then `./parley_data`
pub fn data_root() -> PathBuf {
    if let Ok(val) = std::env::var(ROOT_ENV) {
        if !val.trim().is_empty() {
            return PathBuf::from(val);
        }
    }

    if let Some(root) = load_persistent_root() {
        return root;
    }

    PathBuf::from("parley_data")
}

/// Default SQLite file inside a data root
pub fn database_path(root: &Path) -> PathBuf {
    root.join("parley.sqlite")
}

/// `sqlite:` connection URL for a database file
pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}", path.display())
}

/// Ensure a single directory exists
pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}
