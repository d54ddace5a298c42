//! Checksum sidecar parsing and entrypoint verification.
//!
//! A package may ship a sidecar text file next to its entrypoint, named
//! `<entrypoint>.sha256`, holding a single line of whitespace-separated
//! fields. The first field is the lowercase hex-encoded SHA-256 digest of
//! the entrypoint binary; remaining fields (typically the file name, as
//! emitted by `sha256sum`) are ignored.
//!
//! The supervisor verifies the binary against the descriptor before every
//! spawn and refuses to launch on a mismatch.

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::IntegrityError;

/// Tracing target for integrity operations.
const INTEGRITY_TARGET: &str = "menagerie_plugins::integrity";

/// File extension of the checksum sidecar.
pub const CHECKSUM_FILE_EXT: &str = "sha256";

/// Expectation extracted from a checksum sidecar.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use menagerie_plugins::integrity::ChecksumDescriptor;
///
/// let descriptor = ChecksumDescriptor::load(
///     Path::new("/plugins/cat"),
///     "cat.sha256",
/// )?;
/// descriptor.verify_file(Path::new("/plugins/cat/cat"))?;
/// # Ok::<(), menagerie_plugins::error::IntegrityError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumDescriptor {
    expected: [u8; 32],
}

impl ChecksumDescriptor {
    /// Wraps a raw 32-byte SHA-256 expectation.
    #[must_use]
    pub const fn new(expected: [u8; 32]) -> Self {
        Self { expected }
    }

    /// Parses the sidecar file `file_name` inside `package_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::ChecksumMissing`] when the file cannot be
    /// read and [`IntegrityError::ChecksumMalformed`] when the first field
    /// is absent, not valid hex, or does not decode to 32 bytes.
    pub fn load(package_dir: &Path, file_name: &str) -> Result<Self, IntegrityError> {
        let path = package_dir.join(file_name);
        let contents =
            std::fs::read_to_string(&path).map_err(|source| IntegrityError::ChecksumMissing {
                path: path.clone(),
                source: Arc::new(source),
            })?;

        let hex_digest = contents.split_whitespace().next().ok_or_else(|| {
            IntegrityError::ChecksumMalformed {
                path: path.clone(),
                message: String::from("file holds no digest field"),
            }
        })?;

        let decoded =
            hex::decode(hex_digest).map_err(|err| IntegrityError::ChecksumMalformed {
                path: path.clone(),
                message: format!("digest is not valid hex: {err}"),
            })?;

        let expected: [u8; 32] =
            decoded
                .try_into()
                .map_err(|bytes: Vec<u8>| IntegrityError::ChecksumMalformed {
                    path: path.clone(),
                    message: format!("digest is {} bytes, expected 32", bytes.len()),
                })?;

        debug!(
            target: INTEGRITY_TARGET,
            path = %path.display(),
            digest = %hex::encode(expected),
            "loaded checksum descriptor"
        );

        Ok(Self { expected })
    }

    /// Returns the expected digest.
    #[must_use]
    pub const fn expected(&self) -> &[u8; 32] {
        &self.expected
    }

    /// Returns the expected digest as lowercase hex.
    #[must_use]
    pub fn expected_hex(&self) -> String {
        hex::encode(self.expected)
    }

    /// Hashes the file at `path` and compares it to the expectation.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::ChecksumMissing`] when the file cannot be
    /// read and [`IntegrityError::ChecksumMismatch`] when the digests
    /// differ.
    pub fn verify_file(&self, path: &Path) -> Result<(), IntegrityError> {
        let contents = std::fs::read(path).map_err(|source| IntegrityError::ChecksumMissing {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        let actual: [u8; 32] = Sha256::digest(&contents).into();
        if actual != self.expected {
            return Err(IntegrityError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: hex::encode(self.expected),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }
}

/// Derives the conventional sidecar file name for an entrypoint.
///
/// # Example
///
/// ```
/// use menagerie_plugins::integrity::sidecar_file_name;
///
/// assert_eq!(sidecar_file_name("cat"), "cat.sha256");
/// ```
#[must_use]
pub fn sidecar_file_name(entrypoint: &str) -> String {
    format!("{entrypoint}.{CHECKSUM_FILE_EXT}")
}

#[cfg(test)]
mod tests;
