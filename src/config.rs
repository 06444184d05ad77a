use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::logger::{DefaultLogger, QueryLogger};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "POLYSQL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    /// Pool size applied to connections that do not set their own.
    pub pool_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
    pub query_log: QueryLogMode,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            query_log: QueryLogMode::Tracing,
        }
    }
}

/// Where executed statements are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum QueryLogMode {
    #[default]
    Tracing,
    Off,
}

impl AppConfig {
    /// `$POLYSQL_CONFIG`, or `<config_dir>/polysql/config.toml`.
    pub fn default_path() -> PathBuf {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("polysql")
                .join("config.toml"),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// The statement logger selected by `logging.query_log`.
    pub fn query_logger(&self) -> Arc<dyn QueryLogger> {
        match self.logging.query_log {
            QueryLogMode::Tracing => Arc::new(DefaultLogger::tracing()),
            QueryLogMode::Off => Arc::new(DefaultLogger::null()),
        }
    }
}
