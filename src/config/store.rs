//! The configuration-persistence collaborator seam.
//!
//! The core only needs to load tunnel specs at startup and flush traffic
//! totals; everything else about *where* configuration lives (a JSON file
//! on disk, a future remote store) is this trait's business. The tray UI,
//! PAC installer, and management HTTP server mentioned in the original
//! program are external collaborators that read and write through the same
//! file but are not implemented here.

use crate::util::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One month's accumulated traffic. `month_key` intentionally matches the
/// original program's unpadded `"{year}{month}"` form (e.g. `"20265"` for
/// May 2026) rather than zero-padding the month, for compatibility with
/// already-persisted configuration files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonthlyTraffic {
    pub month: String,
    #[serde(rename = "in")]
    pub inbound: i64,
    pub out: i64,
}

/// The full persisted configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ss_tunnels: Vec<String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
    #[serde(default)]
    pub traffic: MonthlyTraffic,
}

impl Config {
    /// `config["is_global"] == "on"` toggles global routing in the PAC
    /// collaborator; the core does not otherwise interpret this map.
    pub fn is_global(&self) -> bool {
        self.config.get("is_global").map(String::as_str) == Some("on")
    }
}

/// The load/save seam between the core and whatever owns persistence.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<Config>;
    async fn save(&self, config: &Config) -> Result<()>;
}

/// A `ConfigStore` backed by a JSON file, mirroring the original program's
/// own `LoadConfig`/`SaveConfig` pair. Reads and writes are serialized
/// behind a single writer-preferring lock so a flush never observes a
/// partially-written file from a concurrent save.
pub struct JsonFileConfigStore {
    path: PathBuf,
    cache: RwLock<Config>,
}

impl JsonFileConfigStore {
    /// Load (or, if absent, initialize) the file at `path`.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let config = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                crate::util::BridgeError::ConfigParse(format!(
                    "failed to parse {}: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            cache: RwLock::new(config),
        })
    }
}

#[async_trait]
impl ConfigStore for JsonFileConfigStore {
    async fn load(&self) -> Result<Config> {
        Ok(self.cache.read().await.clone())
    }

    async fn save(&self, config: &Config) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(config).map_err(|e| {
            crate::util::BridgeError::ConfigParse(format!("failed to serialize config: {e}"))
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&self.path, bytes).await?;
        *self.cache.write().await = config.clone();
        Ok(())
    }
}

/// An in-memory `ConfigStore`, for exercising the meter-flush path in tests
/// without touching disk.
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<RwLock<Config>>,
}

impl MemoryConfigStore {
    pub fn new(initial: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<Config> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, config: &Config) -> Result<()> {
        *self.inner.write().await = config.clone();
        Ok(())
    }
}
