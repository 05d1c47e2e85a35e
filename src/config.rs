//! Gateway configuration, loaded once from YAML before the service starts.
//!
//! ```yaml
//! server:
//!   log_address: "0.0.0.0:9999"
//! performance:
//!   buffer_size: 1000
//!   batch_size: 1000
//!   batch_timeout_ms: 5000
//! storages:
//!   console_out: { type: console, enabled: true }
//!   archive: { type: file, enabled: true, path: "/var/log/loggate/archive.log" }
//! routing_rules:
//!   - match_condition: { service: pay, level: error }
//!     destinations: [console_out]
//! default_destinations: [archive]
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::env::{env_or, LOGGATE_LOG_ADDRESS_ENV, LOGGATE_LOG_LEVEL_ENV};

pub const DEFAULT_LOG_ADDRESS: &str = "0.0.0.0:9999";
pub const DEFAULT_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub performance: Performance,
    pub logging: LoggingConfig,
    /// Destination name -> storage backend settings.
    pub storages: BTreeMap<String, StorageConfig>,
    /// Evaluated in order, first match wins.
    pub routing_rules: Vec<RoutingRule>,
    /// Used when no rule matches. Empty means unmatched records are dropped.
    pub default_destinations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub log_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_address: DEFAULT_LOG_ADDRESS.to_string(),
        }
    }
}

/// Buffering and batching knobs shared by every destination worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Performance {
    pub buffer_size: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    /// Upper bound on the final flush of each destination during shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for Performance {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout_ms: DEFAULT_BATCH_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl Performance {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Settings for the gateway's own diagnostics.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "loggate=debug,warn".
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// One configured storage backend.
///
/// Only `type` and `enabled` are common; the rest are read by the backend
/// that understands them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    /// Output path for the `file` backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Connection string, e.g. "http://127.0.0.1:8123" for ClickHouse.
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl StorageConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        StorageConfig {
            kind: kind.into(),
            enabled: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoutingRule {
    #[serde(default)]
    pub match_condition: Option<MatchCondition>,
    #[serde(default)]
    pub destinations: Vec<String>,
}

/// Rule predicate. An empty or absent attribute matches any value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MatchCondition {
    pub service: String,
    pub level: String,
}

impl Config {
    /// Read and parse a YAML config file, then apply env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.server.log_address = env_or(LOGGATE_LOG_ADDRESS_ENV, &self.server.log_address);
        self.logging.level = env_or(LOGGATE_LOG_LEVEL_ENV, &self.logging.level);
    }

    /// Enabled storages, in name order.
    pub fn enabled_storages(&self) -> impl Iterator<Item = (&String, &StorageConfig)> {
        self.storages.iter().filter(|(_, s)| s.enabled)
    }

    /// Reject settings that would make the gateway unusable.
    ///
    /// Routing names that point at disabled or unknown storages are not
    /// errors; they are reported by [`Config::dangling_destinations`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let perf = &self.performance;
        if perf.buffer_size == 0 {
            return Err(ConfigError::Invalid("performance.buffer_size must be positive".into()));
        }
        if perf.batch_size == 0 {
            return Err(ConfigError::Invalid("performance.batch_size must be positive".into()));
        }
        if perf.batch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("performance.batch_timeout_ms must be positive".into()));
        }
        if self.enabled_storages().next().is_none() {
            return Err(ConfigError::Invalid("no enabled storages configured".into()));
        }
        for (name, storage) in &self.storages {
            if storage.kind.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("storage '{}' has no type", name)));
            }
        }
        Ok(())
    }

    /// Destination names referenced by routing that have no enabled storage.
    pub fn dangling_destinations(&self) -> Vec<&str> {
        let mut dangling: Vec<&str> = Vec::new();
        let referenced = self
            .routing_rules
            .iter()
            .flat_map(|r| r.destinations.iter())
            .chain(self.default_destinations.iter());

        for name in referenced {
            let enabled = self.storages.get(name).map(|s| s.enabled).unwrap_or(false);
            if !enabled && !dangling.contains(&name.as_str()) {
                dangling.push(name.as_str());
            }
        }
        dangling
    }
}
