//! Configuration for filstore

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default store root
pub fn default_store_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filstore")
}

fn default_listen() -> String {
    "127.0.0.1:9091".to_string()
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store root: the index snapshot and piece payloads live here
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// `[host]:port` the HTTP service listens on
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.store_root.join("config.toml")
    }
}
