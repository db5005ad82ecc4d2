//! Configuration for collections

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{cache::DEFAULT_CACHE_CAPACITY, events::DEFAULT_EVENT_CAPACITY};

/// Collection configuration
///
/// The config is usually loaded from a file with [`Self::load`].
///
/// The struct also implements [`Default`] which creates an in-memory config suitable for
/// testing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the collection state is kept.
    pub storage: StorageConfig,
    /// Number of versions kept in the version cache.
    pub cache_capacity: usize,
    /// Number of messages buffered for late subscribers.
    pub event_capacity: usize,
    /// Namespace of unqualified type names.
    pub namespace: String,
}

/// Storage of the collection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageConfig {
    /// Keep everything in memory.
    Memory,
    /// Store the database at this path.
    Persistent(PathBuf),
}

impl Config {
    /// Load the config from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let s = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        let config: Config = toml::from_str(&s)?;
        Ok(config)
    }

    /// Get the data directory.
    pub fn data_dir() -> Result<PathBuf> {
        let dir = if let Some(val) = env::var_os("IROH_COLLECTIONS_DATA_DIR") {
            PathBuf::from(val)
        } else {
            let path = dirs_next::data_dir().ok_or_else(|| {
                anyhow!("operating environment provides no directory for application data")
            })?;
            path.join("iroh-collections")
        };
        Ok(dir)
    }

    /// Get the default path to the collection database file.
    pub fn default_store_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("collection-1.db"))
    }

    /// A config storing the collection in the default data directory.
    pub fn persistent() -> Result<Self> {
        Ok(Self {
            storage: StorageConfig::Persistent(Self::default_store_path()?),
            ..Default::default()
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            namespace: "default".to_string(),
        }
    }
}
