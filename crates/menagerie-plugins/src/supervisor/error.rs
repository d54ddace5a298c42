//! Errors raised while launching and terminating plugin children.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::error::IntegrityError;
use crate::handshake::HandshakeError;
use crate::transport::TransportKind;

/// Process-level supervision failures.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    /// The child process could not be spawned.
    #[error("plugin '{name}' failed to start: {message}")]
    SpawnFailed {
        /// Plugin name.
        name: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The child exited before completing its handshake.
    #[error("plugin '{name}' exited before handshaking (status {status:?})")]
    ChildExitedEarly {
        /// Plugin name.
        name: String,
        /// Exit status code, when one was observable.
        status: Option<i32>,
    },

    /// The child could not be terminated.
    #[error("failed to stop plugin '{name}': {source}")]
    KillFailed {
        /// Plugin name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The launch descriptor permits no transport at all.
    #[error("plugin '{name}' has no allowed transports; refusing to launch")]
    NoAllowedTransports {
        /// Plugin name.
        name: String,
    },
}

/// Any failure on the way from a launch descriptor to a connected client.
#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    /// The entrypoint failed checksum verification.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Handshake negotiation failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The child process misbehaved.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Connecting to the advertised endpoint failed.
    #[error("plugin '{name}': failed to connect to '{endpoint}': {source}")]
    Connect {
        /// Plugin name.
        name: String,
        /// Endpoint from the handshake line.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The requested package is not in the catalog.
    #[error("package '{package_dir}' is not catalogued")]
    NotCatalogued {
        /// Package directory that was requested.
        package_dir: PathBuf,
    },

    /// The catalogued manifest cannot derive a launch descriptor.
    #[error(transparent)]
    Manifest(#[from] crate::error::ManifestError),
}

/// Errors dispensing a typed service stub from a connected client.
#[derive(Debug, Clone, Error)]
pub enum DispenseError {
    /// The plugin-type tag is not a known contract.
    #[error("unknown plugin contract '{tag}'")]
    UnknownContract {
        /// Tag that was requested.
        tag: String,
    },

    /// The tag does not match the contract the plugin was launched with.
    #[error("plugin serves contract '{served}', not '{requested}'")]
    ContractMismatch {
        /// Contract tag from the plugin's manifest.
        served: String,
        /// Tag that was requested.
        requested: String,
    },

    /// The negotiated transport cannot carry the contract.
    #[error("contract '{tag}' is not available over {transport}")]
    ContractUnsupported {
        /// Contract tag.
        tag: String,
        /// Transport negotiated at handshake.
        transport: TransportKind,
    },

    /// The client has been killed and holds no connection.
    #[error("plugin connection is closed")]
    Disconnected,
}
