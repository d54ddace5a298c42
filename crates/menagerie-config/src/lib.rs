//! Configuration model and loader for the menagerie host runtime.
//!
//! The host consumes a small set of configuration inputs: the plugins root
//! directory, the worker-pool sizing knobs, the supervisor handshake
//! deadline, and the logging filter/format pair. Values are resolved with
//! a fixed precedence: built-in defaults, then the optional `config.yaml`
//! document, then `MENAGERIE_*` environment variables.
//!
//! Configuration is validated on load so the binaries can fail fast with a
//! [`ConfigError`] instead of discovering a nonsensical pool size at the
//! first submission.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod settings;

pub use self::defaults::{
    DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_MAX_WORKERS, DEFAULT_PLUGINS_ROOT,
    default_log_filter,
};
pub use self::error::ConfigError;
pub use self::logging::{LogFormat, LoggingSettings};
pub use self::settings::{
    ApplicationSettings, Config, PoolSettings, SupervisorSettings, WatcherSettings,
};
