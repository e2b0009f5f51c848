//! Server configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file
//! (`--config <path>` or `NEOTOMA_CONFIG`), `NEOTOMA_*` environment
//! variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineConfig;

/// Path of a TOML config file.
pub const ENV_CONFIG: &str = "NEOTOMA_CONFIG";
/// Overrides `data_dir`.
pub const ENV_DATA_DIR: &str = "NEOTOMA_DATA_DIR";
/// Overrides `sync_on_write`.
pub const ENV_SYNC_ON_WRITE: &str = "NEOTOMA_SYNC_ON_WRITE";
/// Overrides `index_queue_capacity`.
pub const ENV_INDEX_QUEUE_CAPACITY: &str = "NEOTOMA_INDEX_QUEUE_CAPACITY";
/// Overrides `index_sync_timeout_ms`.
pub const ENV_INDEX_SYNC_TIMEOUT_MS: &str = "NEOTOMA_INDEX_SYNC_TIMEOUT_MS";
/// Log filter, taking precedence over `RUST_LOG`.
pub const ENV_LOG: &str = "NEOTOMA_LOG";

/// Help text printed by `--help`.
pub const USAGE: &str = "\
neotoma-server - Neotoma truth layer over MCP (JSON-RPC on stdio)

USAGE:
    neotoma-server [OPTIONS]

OPTIONS:
    -c, --config <PATH>       TOML configuration file [env: NEOTOMA_CONFIG]
    -d, --data-dir <DIR>      Persistent data directory [env: NEOTOMA_DATA_DIR]
        --in-memory           Keep all data in memory, ignoring any data directory
    -h, --help                Print help information

ENVIRONMENT:
    NEOTOMA_SYNC_ON_WRITE           fsync the WAL after every write [default: true]
    NEOTOMA_INDEX_QUEUE_CAPACITY    search indexer queue size [default: 1024]
    NEOTOMA_INDEX_SYNC_TIMEOUT_MS   search staleness bound [default: 2000]
    NEOTOMA_LOG                     tracing filter, falls back to RUST_LOG [default: info]
";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("{flag} requires a value")]
    MissingValue { flag: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings of the `neotoma-server` process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Persistent data directory; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Fsync the WAL after every append.
    pub sync_on_write: bool,
    /// Bound of the search indexer queue.
    pub index_queue_capacity: usize,
    /// How long `sync_index` waits for the indexer.
    pub index_sync_timeout_ms: u64,
    /// Page size when a search gives none.
    pub search_default_limit: usize,
    /// Largest search page size.
    pub search_max_limit: usize,
    /// `tracing` filter used when no environment filter is set.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            data_dir: None,
            sync_on_write: true,
            index_queue_capacity: engine.index_queue_capacity,
            index_sync_timeout_ms: u64::try_from(engine.index_sync_timeout.as_millis())
                .unwrap_or(u64::MAX),
            search_default_limit: engine.search_default_limit,
            search_max_limit: engine.search_max_limit,
            log_filter: "info".to_string(),
        }
    }
}

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// `--config <path>`.
    pub config: Option<PathBuf>,
    /// `--data-dir <path>`.
    pub data_dir: Option<PathBuf>,
    /// `--in-memory`; ignores any data directory.
    pub in_memory: bool,
    /// `--help`.
    pub help: bool,
}

impl CliArgs {
    /// Parses arguments, excluding the program name.
    ///
    /// # Errors
    /// Unknown flags and flags missing their value.
    pub fn parse<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    parsed.config = Some(PathBuf::from(
                        args.next().ok_or(ConfigError::MissingValue { flag: arg })?,
                    ));
                }
                "--data-dir" | "-d" => {
                    parsed.data_dir = Some(PathBuf::from(
                        args.next().ok_or(ConfigError::MissingValue { flag: arg })?,
                    ));
                }
                "--in-memory" => parsed.in_memory = true,
                "--help" | "-h" => parsed.help = true,
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }
        Ok(parsed)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl ServerConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    /// Malformed TOML or unknown keys.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    /// I/O or parse failures, tagged with the path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `NEOTOMA_*` overrides read through `env`.
    ///
    /// # Errors
    /// Values that do not parse.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(dir) = env(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = env(ENV_SYNC_ON_WRITE) {
            self.sync_on_write = parse_bool(ENV_SYNC_ON_WRITE, &v)?;
        }
        if let Some(v) = env(ENV_INDEX_QUEUE_CAPACITY) {
            self.index_queue_capacity = parse_env(ENV_INDEX_QUEUE_CAPACITY, &v)?;
        }
        if let Some(v) = env(ENV_INDEX_SYNC_TIMEOUT_MS) {
            self.index_sync_timeout_ms = parse_env(ENV_INDEX_SYNC_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = env(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.log_filter = v;
        }
        Ok(())
    }

    /// Builds the effective configuration from a command line and an
    /// environment lookup. Returns `None` if `--help` was requested.
    ///
    /// # Errors
    /// Any [`ConfigError`], including a failed [`ServerConfig::validate`].
    pub fn load(
        args: &CliArgs,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        if args.help {
            return Ok(None);
        }

        let file = args
            .config
            .clone()
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from));
        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(&env)?;

        if let Some(dir) = &args.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if args.in_memory {
            config.data_dir = None;
        }

        config.validate()?;
        Ok(Some(config))
    }

    /// [`ServerConfig::load`] against the process environment.
    ///
    /// # Errors
    /// See [`ServerConfig::load`].
    pub fn load_from_env(args: &CliArgs) -> Result<Option<Self>, ConfigError> {
        Self::load(args, |key| std::env::var(key).ok())
    }

    /// Rejects settings the engine cannot run with.
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "index_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.index_sync_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "index_sync_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.search_default_limit == 0 {
            return Err(ConfigError::Invalid(
                "search_default_limit must be greater than 0".to_string(),
            ));
        }
        if self.search_default_limit > self.search_max_limit {
            return Err(ConfigError::Invalid(format!(
                "search_default_limit ({}) exceeds search_max_limit ({})",
                self.search_default_limit, self.search_max_limit
            )));
        }
        Ok(())
    }

    /// Engine settings carried by this config.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            index_queue_capacity: self.index_queue_capacity,
            index_sync_timeout: Duration::from_millis(self.index_sync_timeout_ms),
            search_default_limit: self.search_default_limit,
            search_max_limit: self.search_max_limit,
        }
    }

    /// Storage settings carried by this config.
    #[cfg(feature = "persistent")]
    #[must_use]
    pub fn persistent_config(&self) -> crate::storage::persistent::PersistentConfig {
        crate::storage::persistent::PersistentConfig {
            sync_on_write: self.sync_on_write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.index_queue_capacity, 1024);
        assert_eq!(config.index_sync_timeout_ms, 2000);
        assert_eq!(config.engine_config(), EngineConfig::default());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/neotoma"
            search_max_limit = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/neotoma")));
        assert_eq!(config.search_max_limit, 50);
        assert!(config.sync_on_write);

        assert!(ServerConfig::from_toml_str("colour = \"blue\"").is_err());
    }

    #[test]
    fn precedence_file_env_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "data_dir = \"/from/file\"\nindex_queue_capacity = 8").unwrap();

        let args = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::default()
        };
        let env = env_of(&[(ENV_DATA_DIR, "/from/env"), (ENV_SYNC_ON_WRITE, "off")]);
        let config = ServerConfig::load(&args, &env).unwrap().unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/from/env")));
        assert_eq!(config.index_queue_capacity, 8);
        assert!(!config.sync_on_write);

        let args = CliArgs {
            data_dir: Some(PathBuf::from("/from/flag")),
            ..args
        };
        let config = ServerConfig::load(&args, &env).unwrap().unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/from/flag")));

        let args = CliArgs {
            in_memory: true,
            ..args
        };
        assert_eq!(ServerConfig::load(&args, &env).unwrap().unwrap().data_dir, None);
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let env = env_of(&[(ENV_INDEX_QUEUE_CAPACITY, "lots")]);
        let err = ServerConfig::load(&CliArgs::default(), env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let env = env_of(&[(ENV_INDEX_QUEUE_CAPACITY, "0")]);
        let err = ServerConfig::load(&CliArgs::default(), env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validate_limits() {
        let config = ServerConfig {
            search_default_limit: 200,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_parsing() {
        let args = CliArgs::parse(["--data-dir", "/tmp/n", "--in-memory"]).unwrap();
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/n")));
        assert!(args.in_memory);
        assert!(CliArgs::parse(["-h"]).unwrap().help);
        assert!(matches!(
            CliArgs::parse(["--config"]),
            Err(ConfigError::MissingValue { .. })
        ));
        assert!(matches!(
            CliArgs::parse(["--port", "1"]),
            Err(ConfigError::UnknownArgument(_))
        ));
        assert_eq!(ServerConfig::load(&CliArgs::parse(["--help"]).unwrap(), |_| None).unwrap(), None);
    }
}
