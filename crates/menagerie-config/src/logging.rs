//! Logging configuration types shared by the menagerie binaries.
//!
//! Defines the [`LogFormat`] enumeration and the `logging` section of the
//! configuration document, with parsing helpers that integrate with Serde
//! and `strum` derives.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::defaults::{default_log_filter_string, default_log_format};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// The `logging` section of the configuration document.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter expression in `tracing_subscriber::EnvFilter` syntax.
    pub filter: String,
    /// Output format for the installed subscriber.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter_string(),
            format: default_log_format(),
        }
    }
}
