//! The configuration document and its resolution rules.
//!
//! [`Config`] is deserialized from `config.yaml` and then patched with
//! `MENAGERIE_*` environment overrides. Missing sections fall back to the
//! defaults in [`crate::defaults`], so an empty document (or no document at
//! all) yields a fully usable configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    default_handshake_timeout_ms, default_max_workers, default_plugins_root, default_pool_buffer,
    default_true,
};
use crate::error::ConfigError;
use crate::logging::{LogFormat, LoggingSettings};

/// Environment variable overriding the plugins root.
pub const ENV_PLUGINS_ROOT: &str = "MENAGERIE_PLUGINS_ROOT";
/// Environment variable overriding the worker count.
pub const ENV_POOL_MAX_WORKERS: &str = "MENAGERIE_POOL_MAX_WORKERS";
/// Environment variable overriding the channel buffer.
pub const ENV_POOL_BUFFER: &str = "MENAGERIE_POOL_BUFFER";
/// Environment variable overriding the handshake deadline.
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "MENAGERIE_SUPERVISOR_HANDSHAKE_TIMEOUT_MS";
/// Environment variable overriding the log filter.
pub const ENV_LOG_FILTER: &str = "MENAGERIE_LOG_FILTER";
/// Environment variable overriding the log format.
pub const ENV_LOG_FORMAT: &str = "MENAGERIE_LOG_FORMAT";

/// Top-level configuration for the menagerie binaries.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Identity of the embedding application; informational only.
    pub application: ApplicationSettings,
    /// Root directory scanned for plugin packages.
    pub plugins_root: Option<PathBuf>,
    /// Worker-pool sizing.
    pub pool: PoolSettings,
    /// Supervisor knobs.
    pub supervisor: SupervisorSettings,
    /// Logging filter and format.
    pub logging: LoggingSettings,
    /// Filesystem watcher glue.
    pub file_watcher: WatcherSettings,
}

/// The `application` section: free-form identity metadata.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Human-readable application name.
    pub name: String,
    /// Deployment mode tag (e.g. `dev`, `prod`).
    pub mode: String,
    /// Application version string; informational only.
    pub version: String,
}

/// The `pool` section: executor sizing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of workers; must be at least one.
    pub max_workers: usize,
    /// Channel capacity; zero selects unbuffered channels.
    pub buffer: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            buffer: default_pool_buffer(),
        }
    }
}

/// The `supervisor` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Deadline for reading the child handshake line, in milliseconds.
    pub handshake_timeout_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

/// The `file_watcher` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatcherSettings {
    /// Whether the watcher glue is started at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether discovered package directories are registered for interest.
    #[serde(default = "default_true")]
    pub watch_plugins: bool,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_plugins: true,
        }
    }
}

impl Config {
    /// Loads configuration with full precedence: defaults, then the given
    /// file (or `config.yaml` in the working directory when `path` is
    /// `None` and the file exists), then process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when an explicitly named file cannot be
    /// read, when parsing fails, when an environment override holds an
    /// unusable value, or when the resolved configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::load`] with an injected environment lookup.
    ///
    /// Tests use this to exercise override precedence without mutating the
    /// process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(explicit) => Self::from_file(explicit)?,
            None => {
                let implicit = Path::new("config.yaml");
                if implicit.exists() {
                    Self::from_file(implicit)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration document from the given file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns the effective plugins root.
    #[must_use]
    pub fn plugins_root(&self) -> PathBuf {
        self.plugins_root.clone().unwrap_or_else(default_plugins_root)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(root) = env(ENV_PLUGINS_ROOT) {
            self.plugins_root = Some(PathBuf::from(root));
        }
        if let Some(raw) = env(ENV_POOL_MAX_WORKERS) {
            self.pool.max_workers = parse_override(ENV_POOL_MAX_WORKERS, &raw)?;
        }
        if let Some(raw) = env(ENV_POOL_BUFFER) {
            self.pool.buffer = parse_override(ENV_POOL_BUFFER, &raw)?;
        }
        if let Some(raw) = env(ENV_HANDSHAKE_TIMEOUT_MS) {
            self.supervisor.handshake_timeout_ms = parse_override(ENV_HANDSHAKE_TIMEOUT_MS, &raw)?;
        }
        if let Some(filter) = env(ENV_LOG_FILTER) {
            self.logging.filter = filter;
        }
        if let Some(raw) = env(ENV_LOG_FORMAT) {
            self.logging.format =
                LogFormat::from_str(&raw).map_err(|err| ConfigError::InvalidOverride {
                    variable: ENV_LOG_FORMAT.to_string(),
                    value: raw,
                    message: err.to_string(),
                })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_workers == 0 {
            return Err(ConfigError::Invalid {
                message: String::from("pool.max_workers must be at least 1"),
            });
        }
        if self.plugins_root().as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                message: String::from("plugins_root must not be empty"),
            });
        }
        Ok(())
    }
}

fn parse_override<T>(variable: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| ConfigError::InvalidOverride {
        variable: variable.to_string(),
        value: raw.to_string(),
        message: err.to_string(),
    })
}
