//! Plugin manifest parsing and launch-descriptor derivation.
//!
//! Every plugin package carries a `manifest.yaml` describing the plugin's
//! identity, wire format, entrypoint, handshake expectations, security
//! requirements, and requested capabilities. Loading a manifest hashes the
//! raw bytes before parsing so the registry can detect changes cheaply,
//! resolves the entrypoint inside the package, and confirms it is an
//! executable file.
//!
//! A validated manifest derives a [`LaunchDescriptor`]: the complete set of
//! inputs the supervisor needs to spawn and hand-shake the plugin child.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::capability::Capabilities;
use crate::error::ManifestError;
use crate::handshake::HandshakeConfig;
use crate::integrity::ChecksumDescriptor;
use crate::transport::{TransportKind, transports_for_format};
use crate::version::Version;

/// Tracing target for manifest operations.
const MANIFEST_TARGET: &str = "menagerie_plugins::manifest";

/// File name of the manifest inside a package directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.yaml";

/// A 128-bit digest over the raw manifest bytes, used for change detection.
///
/// The value is the first half of the SHA-256 digest; it is stable for the
/// lifetime of the process and depends only on the bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManifestHash([u8; 16]);

impl ManifestHash {
    /// Hashes raw manifest bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut hash = [0u8; 16];
        hash.copy_from_slice(&digest[..16]);
        Self(hash)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for ManifestHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for ManifestHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ManifestHash({})", hex::encode(self.0))
    }
}

/// A parsed plugin manifest.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Manifest {
    /// Identity and wiring of the plugin.
    pub plugin: PluginSection,
    /// Free-form descriptive metadata.
    #[serde(default)]
    pub about: AboutSection,
    /// Handshake expectations; all fields required.
    pub handshake: HandshakeSection,
    /// Security requirements.
    #[serde(default)]
    pub security: SecuritySection,
    /// Capabilities the plugin requests from host services.
    #[serde(default)]
    pub capabilities: Capabilities,
}

/// The `plugin` section of a manifest.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PluginSection {
    /// Plugin name; unique within a catalog.
    pub name: String,
    /// Plugin-type tag selecting the wire contract (e.g. `animal`).
    #[serde(rename = "type")]
    pub contract: String,
    /// Wire format tag; unknown tags leave the plugin unlaunchable.
    pub format: String,
    /// Entrypoint path, relative to the package directory.
    pub entrypoint: String,
    /// Implementation language; metadata only, never trusted.
    #[serde(default)]
    pub language: String,
    /// Version string, e.g. `1.2.0-otter --beta`.
    #[serde(default)]
    pub version: String,
}

/// The `about` section of a manifest.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AboutSection {
    /// Human-readable description.
    pub description: String,
    /// Maintainer contact.
    pub maintainer: String,
    /// Project URL.
    pub url: String,
}

/// The `handshake` section of a manifest. All three fields are required;
/// a manifest without them fails to parse.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HandshakeSection {
    /// Plugin protocol version; must be at least 1.
    pub protocol_version: u32,
    /// Name of the environment variable carrying the magic cookie.
    pub magic_cookie_key: String,
    /// Value the child must find in that variable.
    pub magic_cookie_value: String,
}

impl HandshakeSection {
    /// Validates the section into a [`HandshakeConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidProtocolVersion`],
    /// [`ManifestError::InvalidMagicCookieKey`], or
    /// [`ManifestError::InvalidMagicCookieValue`].
    pub fn to_config(&self) -> Result<HandshakeConfig, ManifestError> {
        if self.protocol_version == 0 {
            return Err(ManifestError::InvalidProtocolVersion {
                version: self.protocol_version,
            });
        }
        if self.magic_cookie_key.is_empty() {
            return Err(ManifestError::InvalidMagicCookieKey);
        }
        if self.magic_cookie_value.is_empty() {
            return Err(ManifestError::InvalidMagicCookieValue);
        }
        Ok(HandshakeConfig {
            protocol_version: self.protocol_version,
            magic_cookie_key: self.magic_cookie_key.clone(),
            magic_cookie_value: self.magic_cookie_value.clone(),
        })
    }
}

/// The `security` section of a manifest.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecuritySection {
    /// Whether the transport must be mutually authenticated at launch.
    pub require_authenticated_transport: bool,
}

impl Manifest {
    /// Loads `manifest.yaml` from a package directory.
    ///
    /// Returns the parsed manifest, the canonical absolute entrypoint path,
    /// and the hash of the raw manifest bytes. The hash is computed before
    /// parsing so malformed-but-changed documents are still distinguishable.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::NotFound`] when no manifest exists,
    /// [`ManifestError::Read`] / [`ManifestError::Parse`] on I/O or YAML
    /// failure, [`ManifestError::EntrypointMissing`] when the declared
    /// entrypoint does not resolve inside the package, and
    /// [`ManifestError::EntrypointNotExecutable`] when it is not an
    /// executable file.
    pub fn load(package_dir: &Path) -> Result<(Self, PathBuf, ManifestHash), ManifestError> {
        let manifest_path = package_dir.join(MANIFEST_FILE_NAME);
        if !manifest_path.exists() {
            return Err(ManifestError::NotFound {
                package_dir: package_dir.to_path_buf(),
            });
        }

        let raw = std::fs::read(&manifest_path).map_err(|source| ManifestError::Read {
            path: manifest_path.clone(),
            source: Arc::new(source),
        })?;
        let hash = ManifestHash::of(&raw);

        let manifest: Self =
            serde_yaml::from_slice(&raw).map_err(|source| ManifestError::Parse {
                path: manifest_path.clone(),
                source: Arc::new(source),
            })?;

        let entrypoint = resolve_entrypoint(package_dir, &manifest.plugin.entrypoint)?;

        debug!(
            target: MANIFEST_TARGET,
            package_dir = %package_dir.display(),
            name = %manifest.plugin.name,
            format = %manifest.plugin.format,
            hash = %hash,
            "loaded manifest"
        );

        Ok((manifest, entrypoint, hash))
    }

    /// Parses the plugin's version string.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::version::VersionParseError`] for unusable
    /// version strings.
    pub fn parsed_version(&self) -> Result<Version, crate::version::VersionParseError> {
        self.plugin.version.parse()
    }

    /// Derives the launch descriptor for this manifest.
    ///
    /// The descriptor is a pure function of the manifest: the command is
    /// the declared entrypoint (relative to the package directory), and the
    /// allowed transports follow the `format` tag. Unknown formats yield an
    /// empty transport set, which the supervisor refuses to launch.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`HandshakeSection::to_config`].
    pub fn to_launch_descriptor(&self) -> Result<LaunchDescriptor, ManifestError> {
        let handshake = self.handshake.to_config()?;
        Ok(LaunchDescriptor {
            name: self.plugin.name.clone(),
            contract: self.plugin.contract.clone(),
            handshake,
            command: PathBuf::from(&self.plugin.entrypoint),
            args: Vec::new(),
            allowed_transports: transports_for_format(&self.plugin.format).to_vec(),
            require_authenticated_transport: self.security.require_authenticated_transport,
            checksum: None,
        })
    }
}

/// Everything the supervisor needs to launch one plugin.
#[derive(Debug, Clone)]
pub struct LaunchDescriptor {
    /// Plugin name.
    pub name: String,
    /// Plugin-type tag from the manifest, keying the service contract.
    pub contract: String,
    /// Validated handshake expectations.
    pub handshake: HandshakeConfig,
    /// Command to spawn.
    pub command: PathBuf,
    /// Arguments to pass to the command.
    pub args: Vec<String>,
    /// Transports the child may select at handshake.
    pub allowed_transports: Vec<TransportKind>,
    /// Whether the transport must be mutually authenticated.
    pub require_authenticated_transport: bool,
    /// Expected entrypoint digest, when a sidecar was present.
    pub checksum: Option<ChecksumDescriptor>,
}

fn resolve_entrypoint(package_dir: &Path, entrypoint: &str) -> Result<PathBuf, ManifestError> {
    if entrypoint.is_empty() {
        return Err(ManifestError::EntrypointMissing {
            entrypoint: entrypoint.to_string(),
            package_dir: package_dir.to_path_buf(),
        });
    }

    let joined = package_dir.join(entrypoint);
    let resolved = joined
        .canonicalize()
        .map_err(|_| ManifestError::EntrypointMissing {
            entrypoint: entrypoint.to_string(),
            package_dir: package_dir.to_path_buf(),
        })?;

    if !is_executable_file(&resolved) {
        return Err(ManifestError::EntrypointNotExecutable { path: resolved });
    }
    Ok(resolved)
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
