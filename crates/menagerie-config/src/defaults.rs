//! Built-in defaults for the menagerie configuration surface.

/// Default plugins root, relative to the host's working directory.
pub const DEFAULT_PLUGINS_ROOT: &str = "plugins";

/// Default worker-pool size when the configuration leaves it unset.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default channel buffer; zero selects unbuffered (rendezvous) channels.
pub const DEFAULT_POOL_BUFFER: usize = 0;

/// Default deadline for reading the child handshake line, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

pub(crate) fn default_plugins_root() -> std::path::PathBuf {
    std::path::PathBuf::from(DEFAULT_PLUGINS_ROOT)
}

pub(crate) const fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

pub(crate) const fn default_pool_buffer() -> usize {
    DEFAULT_POOL_BUFFER
}

pub(crate) const fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

pub(crate) const fn default_true() -> bool {
    true
}
