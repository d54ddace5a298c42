//! The single-line launch handshake exchanged with plugin children.
//!
//! Before serving, a plugin child writes exactly one newline-terminated
//! line to its standard output:
//!
//! ```text
//! core_protocol|plugin_protocol|network|address|transport[|server_proof]
//! ```
//!
//! The supervisor reads that line under a deadline, validates the protocol
//! versions and the transport tag, then connects to the advertised
//! endpoint. The optional sixth field carries the child's proof for
//! authenticated transports.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportKind;

/// Protocol version spoken by this supervisor.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the ephemeral per-launch key, hex-encoded.
///
/// Set on every child; consumed only by plugins whose manifest requires an
/// authenticated transport.
pub const LAUNCH_KEY_ENV: &str = "MENAGERIE_LAUNCH_KEY";

/// Validated handshake expectations taken from a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Plugin protocol version the child must announce.
    pub protocol_version: u32,
    /// Name of the environment variable carrying the magic cookie.
    pub magic_cookie_key: String,
    /// Value the child must find in that variable.
    pub magic_cookie_value: String,
}

/// Network endpoint advertised by a plugin child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A TCP address, e.g. `127.0.0.1:41017`.
    Tcp(String),
    /// A Unix domain socket path.
    Unix(PathBuf),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp|{addr}"),
            Self::Unix(path) => write!(f, "unix|{}", path.display()),
        }
    }
}

/// A parsed handshake line.
///
/// # Example
///
/// ```
/// use menagerie_plugins::handshake::{Endpoint, HandshakeLine};
/// use menagerie_plugins::transport::TransportKind;
///
/// let line = HandshakeLine::parse("1|1|tcp|127.0.0.1:41017|framed-rpc").expect("parses");
/// assert_eq!(line.core_protocol, 1);
/// assert_eq!(line.endpoint, Endpoint::Tcp("127.0.0.1:41017".into()));
/// assert_eq!(line.transport, TransportKind::FramedRpc);
/// assert!(line.server_proof.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    /// Core protocol version announced by the child.
    pub core_protocol: u32,
    /// Plugin protocol version announced by the child.
    pub plugin_protocol: u32,
    /// Endpoint the supervisor should connect to.
    pub endpoint: Endpoint,
    /// Transport the child selected.
    pub transport: TransportKind,
    /// Proof field for authenticated transports.
    pub server_proof: Option<String>,
}

impl HandshakeLine {
    /// Parses a handshake line (without its trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Malformed`] when the field count, numeric
    /// fields, network tag, or transport tag are unusable.
    pub fn parse(line: &str) -> Result<Self, HandshakeError> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('|').collect();
        if !(5..=6).contains(&fields.len()) {
            return Err(HandshakeError::Malformed {
                line: line.to_string(),
                message: format!("expected 5 or 6 fields, found {}", fields.len()),
            });
        }

        let core_protocol = parse_version(line, fields[0], "core protocol")?;
        let plugin_protocol = parse_version(line, fields[1], "plugin protocol")?;

        let endpoint = match fields[2] {
            "tcp" => Endpoint::Tcp(fields[3].to_string()),
            "unix" => Endpoint::Unix(PathBuf::from(fields[3])),
            other => {
                return Err(HandshakeError::Malformed {
                    line: line.to_string(),
                    message: format!("unknown network '{other}'"),
                });
            }
        };

        let transport =
            TransportKind::from_tag(fields[4]).ok_or_else(|| HandshakeError::Malformed {
                line: line.to_string(),
                message: format!("unknown transport '{}'", fields[4]),
            })?;

        let server_proof = fields
            .get(5)
            .filter(|proof| !proof.is_empty())
            .map(ToString::to_string);

        Ok(Self {
            core_protocol,
            plugin_protocol,
            endpoint,
            transport,
            server_proof,
        })
    }

    /// Renders the line a child would write for these fields.
    #[must_use]
    pub fn render(&self) -> String {
        let mut line = format!(
            "{}|{}|{}|{}",
            self.core_protocol, self.plugin_protocol, self.endpoint, self.transport
        );
        if let Some(proof) = &self.server_proof {
            line.push('|');
            line.push_str(proof);
        }
        line
    }
}

fn parse_version(line: &str, field: &str, what: &str) -> Result<u32, HandshakeError> {
    field.parse().map_err(|_| HandshakeError::Malformed {
        line: line.to_string(),
        message: format!("{what} '{field}' is not a number"),
    })
}

/// Errors arising during handshake negotiation.
#[derive(Debug, Clone, Error)]
pub enum HandshakeError {
    /// The child produced no handshake line within the deadline.
    #[error("plugin '{name}' did not hand shake within {waited_ms}ms")]
    TimedOut {
        /// Plugin name.
        name: String,
        /// Deadline that expired, in milliseconds.
        waited_ms: u64,
    },

    /// The handshake line could not be parsed.
    #[error("malformed handshake line '{line}': {message}")]
    Malformed {
        /// The offending line.
        line: String,
        /// Description of the problem.
        message: String,
    },

    /// The announced protocol version does not match the expectation.
    #[error("{what} version mismatch: expected {expected}, plugin announced {actual}")]
    ProtocolMismatch {
        /// Which protocol mismatched (`core` or `plugin`).
        what: &'static str,
        /// Version the supervisor expected.
        expected: u32,
        /// Version the child announced.
        actual: u32,
    },

    /// The magic cookie seen by the child does not match the manifest.
    #[error("plugin '{name}' rejected the magic cookie")]
    MagicCookieMismatch {
        /// Plugin name.
        name: String,
    },

    /// The child selected a transport the manifest does not allow.
    #[error("transport '{requested}' is not allowed (allowed: {allowed:?})")]
    TransportNotAllowed {
        /// Transport the child announced.
        requested: TransportKind,
        /// Transports the manifest permits.
        allowed: Vec<TransportKind>,
    },

    /// The authenticated-transport proof was absent or wrong.
    #[error("plugin '{name}' failed transport authentication: {message}")]
    AuthenticationFailed {
        /// Plugin name.
        name: String,
        /// Description of the failure.
        message: String,
    },
}

#[cfg(test)]
mod tests;
