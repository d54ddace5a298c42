//! Domain errors raised by manifest loading and integrity verification.
//!
//! All errors use `thiserror`-derived enums with structured context so
//! callers can inspect the failure programmatically. I/O errors are wrapped
//! in `Arc` where the error value must stay cloneable.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors arising while loading or validating a plugin manifest.
#[derive(Debug, Clone, Error)]
pub enum ManifestError {
    /// No `manifest.yaml` exists in the package directory.
    #[error("no manifest found in package '{package_dir}'")]
    NotFound {
        /// Package directory that was scanned.
        package_dir: PathBuf,
    },

    /// The manifest file exists but could not be read.
    #[error("failed to read manifest '{path}': {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The manifest document failed to parse.
    #[error("failed to parse manifest '{path}': {source}")]
    Parse {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: Arc<serde_yaml::Error>,
    },

    /// The declared entrypoint does not exist inside the package.
    #[error("entrypoint '{entrypoint}' not found in package '{package_dir}'")]
    EntrypointMissing {
        /// Entrypoint path as declared in the manifest.
        entrypoint: String,
        /// Package directory that was scanned.
        package_dir: PathBuf,
    },

    /// The entrypoint exists but is not an executable file.
    #[error("entrypoint '{path}' is not executable")]
    EntrypointNotExecutable {
        /// Resolved entrypoint path.
        path: PathBuf,
    },

    /// The handshake section declares a protocol version below 1.
    #[error("invalid protocol version {version}; must be at least 1")]
    InvalidProtocolVersion {
        /// Version found in the manifest.
        version: u32,
    },

    /// The handshake section declares an empty magic-cookie key.
    #[error("invalid magic cookie key: must not be empty")]
    InvalidMagicCookieKey,

    /// The handshake section declares an empty magic-cookie value.
    #[error("invalid magic cookie value: must not be empty")]
    InvalidMagicCookieValue,
}

/// Errors arising from checksum sidecar parsing and binary verification.
#[derive(Debug, Clone, Error)]
pub enum IntegrityError {
    /// The checksum sidecar could not be opened or read.
    #[error("failed to read checksum file '{path}': {source}")]
    ChecksumMissing {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The checksum sidecar exists but its first field is not a 64-char
    /// hex-encoded SHA-256 digest.
    #[error("malformed checksum file '{path}': {message}")]
    ChecksumMalformed {
        /// Path that was parsed.
        path: PathBuf,
        /// Description of the malformation.
        message: String,
    },

    /// The binary's digest does not match the sidecar's expectation.
    #[error("checksum mismatch for '{path}': expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Binary that was hashed.
        path: PathBuf,
        /// Hex digest from the sidecar.
        expected: String,
        /// Hex digest of the actual file contents.
        actual: String,
    },
}

#[cfg(test)]
mod tests;
