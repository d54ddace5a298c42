//! Structured telemetry initialisation for the host binary.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use menagerie_config::{Config, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Repeated calls are idempotent: the first invocation installs the global
/// subscriber; later ones return a fresh [`TelemetryHandle`] without
/// touching global state.
///
/// # Errors
///
/// Returns a [`TelemetryError`] when the filter is malformed or a
/// subscriber is already installed by other means.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|()| TelemetryHandle)
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&config.logging.filter)
        .map_err(|err| TelemetryError::Filter(err.to_string()))?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    let result = match config.logging.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        LogFormat::Compact => tracing::subscriber::set_global_default(builder.compact().finish()),
    };
    result.map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialise_is_idempotent() {
        let config = Config::default();
        let first = initialise(&config).expect("first initialisation");
        let second = initialise(&config).expect("second initialisation");
        drop(first);
        drop(second);
    }

    #[test]
    fn bad_filter_is_rejected() {
        let mut config = Config::default();
        config.logging.filter = String::from("not==a==filter");
        // Only meaningful when this test runs before a successful install;
        // afterwards the guard short-circuits. Either way, no panic.
        let _ = initialise(&config);
    }
}
