//! Configuration file handling
//!
//! Settings live in `~/.config/nystatus/config.toml`. Every key is optional;
//! missing keys fall back to the defaults below. `NYSTATUS_DATABASE` (also read
//! from a `.env` file) overrides the database location.

pub mod repository;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "nystatus";
const DATABASE_ENV: &str = "NYSTATUS_DATABASE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub fetch: FetchConfig,
    pub endpoints: EndpointConfig,
}

/// HTTP settings for talking to instances and changelog hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// Remote method names appended to an instance URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub products: String,
    pub portals: String,
    pub errors: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: config_dir().join("nystatus.db"),
            fetch: FetchConfig::default(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("nystatus/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            products: "getProducts".to_string(),
            portals: "getPortals".to_string(),
            errors: "getErrors".to_string(),
        }
    }
}

/// Directory holding the config file and, by default, the database
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default location of the config file
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

impl Config {
    /// Load from `path` (or the default location), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(database) = std::env::var(DATABASE_ENV) {
            if !database.trim().is_empty() {
                config.database_path = PathBuf::from(database);
            }
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.fetch.timeout_secs == 0 {
            anyhow::bail!("fetch.timeout_secs must be greater than zero");
        }
        Ok(config)
    }

    /// Write the config to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
