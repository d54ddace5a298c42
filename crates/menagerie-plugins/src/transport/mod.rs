//! Wire transports between the supervisor and plugin children.
//!
//! Two transports are supported. `framed-rpc` is a length-prefixed
//! request/response exchange over a single stream. `stream-rpc` multiplexes
//! bidirectional streams over one connection; each request opens a fresh
//! stream. A manifest's `format` field selects which transports a plugin
//! may offer: `framed-rpc` plugins offer only framed, `stream-rpc` plugins
//! may fall back to framed. The actual transport is chosen by the child at
//! handshake time.

pub mod framed;
pub mod mux;

#[cfg(test)]
mod tests;

use std::io::{Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handshake::Endpoint;

pub use self::framed::FramedConnection;
pub use self::mux::MuxConnection;

/// Upper bound on a single frame body, shared by both transports.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// A wire transport tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Length-prefixed request/response over a single stream.
    FramedRpc,
    /// Multiplexed bidirectional streams.
    StreamRpc,
}

impl TransportKind {
    /// Returns the canonical tag used in manifests and handshake lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FramedRpc => "framed-rpc",
            Self::StreamRpc => "stream-rpc",
        }
    }

    /// Parses a transport tag; returns `None` for unknown tags.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "framed-rpc" => Some(Self::FramedRpc),
            "stream-rpc" => Some(Self::StreamRpc),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a manifest `format` tag to the transports it permits.
///
/// Unknown formats map to the empty slice; callers must refuse to launch a
/// plugin with no allowed transports.
///
/// # Example
///
/// ```
/// use menagerie_plugins::transport::{TransportKind, transports_for_format};
///
/// assert_eq!(transports_for_format("framed-rpc"), [TransportKind::FramedRpc]);
/// assert_eq!(
///     transports_for_format("stream-rpc"),
///     [TransportKind::FramedRpc, TransportKind::StreamRpc],
/// );
/// assert!(transports_for_format("carrier-pigeon").is_empty());
/// ```
#[must_use]
pub fn transports_for_format(format: &str) -> &'static [TransportKind] {
    match format {
        "framed-rpc" => &[TransportKind::FramedRpc],
        "stream-rpc" => &[TransportKind::FramedRpc, TransportKind::StreamRpc],
        _ => &[],
    }
}

/// Errors arising on the wire.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying stream failed.
    #[error("transport I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A peer announced a frame larger than [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    FrameTooLarge {
        /// Announced frame length.
        len: u32,
    },

    /// A frame body failed to encode or decode.
    #[error("frame codec error: {source}")]
    Codec {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The peer closed the connection mid-exchange.
    #[error("connection closed by peer")]
    Closed,

    /// A multiplexed frame carried an unknown type tag.
    #[error("unknown mux frame kind {kind}")]
    UnknownFrameKind {
        /// The unrecognised tag byte.
        kind: u8,
    },
}

impl From<std::io::Error> for TransportError {
    fn from(source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Closed
        } else {
            Self::Io {
                source: Arc::new(source),
            }
        }
    }
}

/// A connected byte stream to a plugin child.
#[derive(Debug)]
pub enum Connection {
    /// TCP connection.
    Tcp(TcpStream),
    /// Unix domain socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    /// Connects to the endpoint a child advertised in its handshake.
    ///
    /// TCP connections honour `timeout`; Unix connections complete or fail
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the endpoint is unreachable.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> std::io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                use std::net::ToSocketAddrs;
                let resolved = addr
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| std::io::Error::other(format!("unresolvable address '{addr}'")))?;
                let stream = TcpStream::connect_timeout(&resolved, timeout)?;
                stream.set_nodelay(true)?;
                Ok(Self::Tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixStream::connect(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(std::io::Error::other(format!(
                "unix endpoint '{}' unsupported on this platform",
                path.display()
            ))),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}
