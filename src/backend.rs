use std::collections::HashMap;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::console::ConsoleSink;
use crate::file::FileSink;
use crate::noop_sink::NoopSink;
use crate::sink::LogSink;

/// Constructor for one storage type. Receives the destination name and its
/// configuration entry.
pub type SinkConstructor =
    Arc<dyn Fn(&str, &StorageConfig) -> Result<Arc<dyn LogSink>, BackendBuildError> + Send + Sync>;

/// Error type returned when building a backend sink from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BackendBuildError {
    #[error("unknown storage type '{kind}' for destination '{name}'")]
    UnknownType { name: String, kind: String },

    #[error("destination '{name}' is missing required setting '{setting}'")]
    MissingSetting { name: String, setting: &'static str },

    #[error("failed to open destination '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("clickhouse feature is not enabled")]
    ClickhouseFeatureDisabled,
}

/// Maps storage type names (the `type` key of a storage entry) to sink
/// constructors.
///
/// Unknown type names fail fast when the gateway starts.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    constructors: HashMap<String, SinkConstructor>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `console`, `file`, `noop` and (with the
    /// `clickhouse` feature) `clickhouse`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register("console", |_, _| Ok(Arc::new(ConsoleSink::new()) as Arc<dyn LogSink>));
        registry.register("noop", |_, _| Ok(Arc::new(NoopSink) as Arc<dyn LogSink>));
        registry.register("file", |name, cfg| {
            let path = cfg.path.as_ref().ok_or_else(|| BackendBuildError::MissingSetting {
                name: name.to_string(),
                setting: "path",
            })?;
            let sink = FileSink::open(path).map_err(|source| BackendBuildError::Io {
                name: name.to_string(),
                source,
            })?;
            Ok(Arc::new(sink) as Arc<dyn LogSink>)
        });
        registry.register("clickhouse", build_clickhouse);

        registry
    }

    /// Register (or replace) the constructor for a storage type.
    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&str, &StorageConfig) -> Result<Arc<dyn LogSink>, BackendBuildError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(kind.to_ascii_lowercase(), Arc::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(&kind.to_ascii_lowercase())
    }

    /// Build the sink for one destination.
    pub fn build(&self, name: &str, cfg: &StorageConfig) -> Result<Arc<dyn LogSink>, BackendBuildError> {
        let constructor = self
            .constructors
            .get(&cfg.kind.to_ascii_lowercase())
            .ok_or_else(|| BackendBuildError::UnknownType {
                name: name.to_string(),
                kind: cfg.kind.clone(),
            })?;
        constructor(name, cfg)
    }

    /// Build sinks for every enabled storage. Stops at the first failure.
    pub fn build_enabled<'a, I>(&self, storages: I) -> Result<HashMap<String, Arc<dyn LogSink>>, BackendBuildError>
    where
        I: IntoIterator<Item = (&'a String, &'a StorageConfig)>,
    {
        let mut sinks = HashMap::new();
        for (name, cfg) in storages {
            if !cfg.enabled {
                continue;
            }
            let sink = self.build(name, cfg)?;
            tracing::info!(destination = %name, kind = %cfg.kind, "storage backend ready");
            sinks.insert(name.clone(), sink);
        }
        Ok(sinks)
    }
}

fn build_clickhouse(name: &str, cfg: &StorageConfig) -> Result<Arc<dyn LogSink>, BackendBuildError> {
    #[cfg(feature = "clickhouse")]
    {
        use crate::clickhouse::{ClickHouseConfig, ClickHouseSink};

        let url = cfg.dsn.clone().ok_or_else(|| BackendBuildError::MissingSetting {
            name: name.to_string(),
            setting: "dsn",
        })?;
        let config = ClickHouseConfig {
            url,
            database: cfg.database.clone().unwrap_or_else(|| "default".to_string()),
            table: cfg.table.clone().unwrap_or_else(|| "logs".to_string()),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
        };
        Ok(Arc::new(ClickHouseSink::new(config)) as Arc<dyn LogSink>)
    }

    #[cfg(not(feature = "clickhouse"))]
    {
        let _ = (name, cfg);
        Err(BackendBuildError::ClickhouseFeatureDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn unknown_type_fails_fast() {
        let registry = SinkRegistry::with_builtins();
        let err = registry
            .build("weird", &StorageConfig::new("influx"))
            .err()
            .expect("unknown type must fail");
        assert!(matches!(err, BackendBuildError::UnknownType { ref kind, .. } if kind == "influx"));
    }

    #[test]
    fn type_names_are_case_insensitive() {
        let registry = SinkRegistry::with_builtins();
        assert!(registry.contains("Console"));
        assert!(registry.build("out", &StorageConfig::new("CONSOLE")).is_ok());
    }

    #[test]
    fn file_requires_path() {
        let registry = SinkRegistry::with_builtins();
        let err = registry.build("archive", &StorageConfig::new("file")).err().unwrap();
        assert!(matches!(err, BackendBuildError::MissingSetting { setting: "path", .. }));
    }

    #[test]
    fn custom_constructor_is_used() {
        let mut registry = SinkRegistry::new();
        registry.register("blackhole", |_, _| Ok(Arc::new(NoopSink) as Arc<dyn LogSink>));
        assert!(registry.build("x", &StorageConfig::new("blackhole")).is_ok());
        assert!(registry.build("y", &StorageConfig::new("console")).is_err());
    }

    #[test]
    fn build_enabled_skips_disabled_entries() {
        let registry = SinkRegistry::with_builtins();
        let mut storages = BTreeMap::new();
        storages.insert("on".to_string(), StorageConfig::new("noop"));
        storages.insert(
            "off".to_string(),
            StorageConfig {
                enabled: false,
                ..StorageConfig::new("does-not-exist")
            },
        );

        let sinks = registry.build_enabled(&storages).unwrap();
        assert_eq!(sinks.len(), 1);
        assert!(sinks.contains_key("on"));
    }
}
