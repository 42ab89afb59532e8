//! Server configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Tunables for a [`Server`](crate::Server).
///
/// Loaded from TOML; every field is optional.
///
/// ```toml
/// workers = 8
/// queues = 3
/// use_air = false
/// result_retention_secs = 300
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker threads, and scratch contexts.
    pub workers: usize,
    /// Number of priority queues; queue 0 is served first.
    pub queues: usize,
    /// Report hits on air regions and give them component entries.
    pub use_air: bool,
    /// How long a finished, unretrieved result is kept.
    pub result_retention_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queues: 3,
            use_air: false,
            result_retention_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ServerError::Config("workers must be at least 1".into()));
        }
        if self.queues == 0 {
            return Err(ServerError::Config("queues must be at least 1".into()));
        }
        Ok(())
    }

    /// Result retention as a duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }
}
