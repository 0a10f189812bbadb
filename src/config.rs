//! Server Configuration
//!
//! kvplug is configured from a TOML file:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 6001
//! request_timeout_ms = 5000
//!
//! [storages.memory-rr]
//! driver = "memory"
//! sweep_interval_ms = 1000
//!
//! [redis]
//! addr = "127.0.0.1:6379"
//!
//! [storages.redis-rr]
//! driver = "redis"
//!
//! [storages.redis-cache]
//! driver = "redis"
//! addr = "10.0.0.5:6379"
//! db = 1
//! ```
//!
//! Every `[storages.NAME]` table becomes one registered storage instance.
//! A redis storage takes any setting it does not name itself from the
//! shared `[redis]` table. A redis storage with no address in either place
//! is skipped with a warning.
//!
//! Without a file, [`Config::default`] registers a single memory storage
//! named `memory`.

use crate::registry::StorageRegistry;
use crate::storage::{Driver, ExpirySweeper, MemoryDriver, RedisConfig, RedisDriver};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Name of the storage registered when no configuration file is given.
pub const DEFAULT_STORAGE: &str = "memory";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Settings shared by every redis storage
    #[serde(default)]
    pub redis: Option<RedisSection>,
    #[serde(default)]
    pub storages: BTreeMap<String, StorageConfig>,
}

/// The shared `[redis]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisSection {
    pub addr: String,
    #[serde(default)]
    pub db: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request deadline; absent means none
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// One storage instance, tagged by its driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory {
        #[serde(default = "default_sweep_interval_ms")]
        sweep_interval_ms: u64,
        #[serde(default = "default_shards")]
        shards: usize,
    },
    /// Unset fields fall back to the shared `[redis]` table.
    Redis {
        #[serde(default)]
        addr: Option<String>,
        #[serde(default)]
        db: Option<u32>,
        #[serde(default)]
        connect_timeout_ms: Option<u64>,
    },
}

fn default_host() -> String {
    crate::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    crate::DEFAULT_PORT
}

fn default_shutdown_grace_ms() -> u64 {
    crate::server::DEFAULT_SHUTDOWN_GRACE.as_millis() as u64
}

fn default_sweep_interval_ms() -> u64 {
    crate::storage::DEFAULT_SWEEP_INTERVAL.as_millis() as u64
}

fn default_shards() -> usize {
    crate::storage::DEFAULT_SHARDS
}

fn default_connect_timeout_ms() -> u64 {
    crate::storage::redis::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory {
            sweep_interval_ms: default_sweep_interval_ms(),
            shards: default_shards(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut storages = BTreeMap::new();
        storages.insert(DEFAULT_STORAGE.to_string(), StorageConfig::default());

        Self {
            server: ServerConfig::default(),
            redis: None,
            storages,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    /// Loads and validates the configuration at `path`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Collects every problem in the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port cannot be 0".to_string());
        }
        if self.server.request_timeout_ms == Some(0) {
            errors.push("server.request_timeout_ms cannot be 0".to_string());
        }
        if self.storages.is_empty() {
            errors.push("at least one [storages.NAME] table is required".to_string());
        }
        if let Some(redis) = &self.redis {
            if redis.addr.trim().is_empty() {
                errors.push("redis.addr cannot be empty".to_string());
            }
        }

        for (name, storage) in &self.storages {
            if name.trim().is_empty() {
                errors.push("storage name cannot be empty".to_string());
            }

            match storage {
                StorageConfig::Memory {
                    sweep_interval_ms,
                    shards,
                } => {
                    if *sweep_interval_ms == 0 {
                        errors.push(format!("storages.{}.sweep_interval_ms cannot be 0", name));
                    }
                    if *shards == 0 {
                        errors.push(format!("storages.{}.shards cannot be 0", name));
                    }
                }
                StorageConfig::Redis { addr, .. } => {
                    if addr.as_deref().is_some_and(|a| a.trim().is_empty()) {
                        errors.push(format!("storages.{}.addr cannot be empty", name));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Opens every configured storage and registers it.
    ///
    /// Memory storages get a running sweeper; keep the returned handles
    /// alive for as long as the storages are served. Must be called from
    /// within a Tokio runtime.
    pub fn build_registry(&self) -> (StorageRegistry, Vec<ExpirySweeper>) {
        let mut registry = StorageRegistry::new();
        let mut sweepers = Vec::new();

        for (name, storage) in &self.storages {
            match storage.open(name, self.redis.as_ref()) {
                Some((driver, sweeper)) => {
                    registry.register(name.clone(), driver);
                    sweepers.extend(sweeper);
                }
                None => warn!(
                    storage = %name,
                    driver = storage.driver_name(),
                    "can't find local or global configuration, this section will be skipped"
                ),
            }
        }

        (registry, sweepers)
    }
}

impl StorageConfig {
    pub fn driver_name(&self) -> &'static str {
        match self {
            StorageConfig::Memory { .. } => "memory",
            StorageConfig::Redis { .. } => "redis",
        }
    }

    /// Connection settings of a redis storage, filling gaps from `shared`.
    ///
    /// `None` for memory storages and for redis storages with no address.
    pub fn redis_config(&self, shared: Option<&RedisSection>) -> Option<RedisConfig> {
        let StorageConfig::Redis {
            addr,
            db,
            connect_timeout_ms,
        } = self
        else {
            return None;
        };

        let addr = addr.clone().or_else(|| shared.map(|r| r.addr.clone()))?;
        let db = db.or(shared.map(|r| r.db)).unwrap_or(0);
        let connect_timeout_ms = connect_timeout_ms
            .or(shared.map(|r| r.connect_timeout_ms))
            .unwrap_or_else(default_connect_timeout_ms);

        Some(RedisConfig {
            addr,
            db,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
        })
    }

    /// Creates the driver, plus its sweeper for memory storages.
    ///
    /// `None` when a redis storage has no address locally or in `shared`.
    pub fn open(
        &self,
        name: &str,
        shared: Option<&RedisSection>,
    ) -> Option<(Arc<dyn Driver>, Option<ExpirySweeper>)> {
        match self {
            StorageConfig::Memory {
                sweep_interval_ms,
                shards,
            } => {
                let driver = Arc::new(MemoryDriver::with_shards(*shards));
                let sweeper = ExpirySweeper::start(
                    Arc::clone(&driver),
                    name,
                    Duration::from_millis(*sweep_interval_ms),
                );
                Some((driver, Some(sweeper)))
            }
            StorageConfig::Redis { .. } => {
                let config = self.redis_config(shared)?;
                Some((Arc::new(RedisDriver::new(config)), None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
            [server]
            host = "0.0.0.0"
            port = 7000
            request_timeout_ms = 250

            [storages.memory-rr]
            driver = "memory"
            sweep_interval_ms = 50

            [storages.redis-rr]
            driver = "redis"
            addr = "127.0.0.1:6379"
            db = 2
            "#,
        );

        let config = Config::load_from(file.path()).unwrap();

        assert_eq!(config.server.bind_address(), "0.0.0.0:7000");
        assert_eq!(config.server.request_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.server.shutdown_grace(), Duration::from_secs(5));

        assert_eq!(
            config.storages["memory-rr"],
            StorageConfig::Memory {
                sweep_interval_ms: 50,
                shards: 16
            }
        );
        assert_eq!(
            config.storages["redis-rr"].redis_config(config.redis.as_ref()),
            Some(RedisConfig {
                addr: "127.0.0.1:6379".into(),
                db: 2,
                connect_timeout: Duration::from_secs(1),
            })
        );
    }

    #[test]
    fn test_server_section_is_optional() {
        let file = write_config(
            r#"
            [storages.cache]
            driver = "memory"
            "#,
        );

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.storages["cache"], StorageConfig::default());
    }

    #[test]
    fn test_validation_collects_errors() {
        let file = write_config(
            r#"
            [redis]
            addr = ""

            [storages.fast]
            driver = "memory"
            sweep_interval_ms = 0

            [storages.remote]
            driver = "redis"
            addr = " "
            "#,
        );

        match Config::load_from(file.path()) {
            Err(ConfigError::Invalid(errors)) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| e.contains("sweep_interval_ms")));
                assert!(errors.iter().any(|e| e.starts_with("redis.addr")));
                assert!(errors.iter().any(|e| e.contains("storages.remote.addr")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_redis_storage_uses_shared_section() {
        let file = write_config(
            r#"
            [redis]
            addr = "127.0.0.1:6379"
            db = 4
            connect_timeout_ms = 300

            [storages.redis-rr]
            driver = "redis"

            [storages.redis-cache]
            driver = "redis"
            addr = "10.0.0.5:6379"
            db = 1
            "#,
        );
        let config = Config::load_from(file.path()).unwrap();
        let shared = config.redis.as_ref();

        assert_eq!(
            config.storages["redis-rr"].redis_config(shared),
            Some(RedisConfig {
                addr: "127.0.0.1:6379".into(),
                db: 4,
                connect_timeout: Duration::from_millis(300),
            })
        );
        // Local settings win, the rest comes from [redis]
        assert_eq!(
            config.storages["redis-cache"].redis_config(shared),
            Some(RedisConfig {
                addr: "10.0.0.5:6379".into(),
                db: 1,
                connect_timeout: Duration::from_millis(300),
            })
        );
    }

    #[tokio::test]
    async fn test_redis_storage_without_address_is_skipped() {
        let file = write_config(
            r#"
            [storages.memory-rr]
            driver = "memory"

            [storages.redis-rr]
            driver = "redis"
            "#,
        );
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.storages["redis-rr"].redis_config(None), None);

        let (registry, sweepers) = config.build_registry();

        assert_eq!(registry.names(), vec!["memory-rr"]);
        assert_eq!(sweepers.len(), 1);
        assert!(matches!(
            registry.resolve("redis-rr"),
            Err(crate::error::KvError::UnknownStorage(_))
        ));
    }

    #[test]
    fn test_unknown_driver_is_parse_error() {
        let file = write_config(
            r#"
            [storages.disk]
            driver = "boltdb"
            "#,
        );

        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load_from("/nonexistent/kvplug.toml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_default_has_memory_storage() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storages.len(), 1);
        assert_eq!(config.storages[DEFAULT_STORAGE].driver_name(), "memory");
    }

    #[tokio::test]
    async fn test_build_registry() {
        let file = write_config(
            r#"
            [storages.memory-rr]
            driver = "memory"

            [storages.redis-rr]
            driver = "redis"
            addr = "127.0.0.1:1"
            "#,
        );
        let config = Config::load_from(file.path()).unwrap();

        let (registry, sweepers) = config.build_registry();

        assert_eq!(registry.names(), vec!["memory-rr", "redis-rr"]);
        assert_eq!(sweepers.len(), 1);
        assert_eq!(registry.resolve("redis-rr").unwrap().kind(), "redis");
    }
}
