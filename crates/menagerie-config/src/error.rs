//! Errors raised while loading or validating configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors arising from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document failed to parse.
    #[error("failed to parse configuration file '{path}': {source}")]
    Parse {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// An environment override held a value the field cannot accept.
    #[error("invalid value '{value}' for {variable}: {message}")]
    InvalidOverride {
        /// Environment variable name.
        variable: String,
        /// The offending value.
        value: String,
        /// Why the value was rejected.
        message: String,
    },

    /// A resolved field failed semantic validation.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// Description of the violated constraint.
        message: String,
    },
}
