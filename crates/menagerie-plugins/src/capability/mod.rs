//! The declarative capability schema plugins request in their manifests.
//!
//! Capabilities constrain what a plugin may ask of host-provided
//! filesystem, network, and process services. The schema is deserialized
//! from the manifest's `capabilities` section; the
//! [`CapabilityEvaluator`](evaluator::CapabilityEvaluator) answers queries
//! from host services against it. Every category defaults to deny: an
//! absent section grants nothing.

pub mod evaluator;


use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use self::evaluator::{CapabilityError, CapabilityEvaluator, CapabilityRequest};

/// All permissions requested by one plugin, grouped by area.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Capabilities {
    /// Filesystem path grants.
    pub filesystem: Vec<FsGrant>,
    /// Network rules; `None` means no network access at all.
    pub network: Option<NetworkCapabilities>,
    /// Process grants.
    pub process: Vec<ProcessGrant>,
}

impl Capabilities {
    /// Returns `true` when no grants are present in any category.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filesystem.is_empty()
            && self.process.is_empty()
            && self
                .network
                .as_ref()
                .is_none_or(|net| net.egress.is_empty() && net.ingress.is_empty())
    }
}

/// Permission for a filesystem path.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FsGrant {
    /// Path the grant covers.
    pub path: PathBuf,
    /// Operations permitted on the path.
    pub permissions: Vec<FsPermission>,
    /// Whether the grant extends below a directory path.
    #[serde(default)]
    pub recursive: bool,
}

/// A single filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsPermission {
    /// Read file contents.
    Read,
    /// Write file contents.
    Write,
    /// List directory entries.
    List,
    /// Create new entries.
    Create,
    /// Delete entries.
    Delete,
}

/// Network rules, split by direction.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkCapabilities {
    /// Outbound connection rules.
    pub egress: Vec<EgressRule>,
    /// Inbound listener rules.
    pub ingress: Vec<IngressRule>,
}

/// An outbound rule: protocol, host, and port must all match.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EgressRule {
    /// Transport protocol.
    pub protocol: NetProtocol,
    /// Hostnames or IP literals, matched verbatim.
    pub hosts: Vec<String>,
    /// Permitted destination ports.
    pub ports: Vec<u16>,
}

/// An inbound rule: protocol and port must match, and the origin must be
/// listed (exact host) or contained (CIDR block).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct IngressRule {
    /// Transport protocol.
    pub protocol: NetProtocol,
    /// Permitted listening ports.
    pub ports: Vec<u16>,
    /// Origins permitted to connect: exact hosts or CIDR blocks.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Network transport protocols covered by rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl std::fmt::Display for NetProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

/// A process grant. Exactly one field is expected to be populated per
/// entry; empty scope lists grant nothing.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessGrant {
    /// Permission to spawn a specific command.
    pub exec: Option<ExecRule>,
    /// Scopes whose processes may be killed.
    pub kill: Vec<ProcessScope>,
    /// Scopes whose processes may be listed.
    pub list: Vec<ProcessScope>,
    /// Scopes whose processes may be signalled.
    pub signal: Vec<ProcessScope>,
}

/// Which processes a kill/list/signal grant covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessScope {
    /// Child processes of the plugin itself.
    Children,
    /// All processes visible to the host service.
    All,
}

impl std::fmt::Display for ProcessScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Children => f.write_str("children"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Constraints on spawning a command.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExecRule {
    /// Command that may be run; matched exactly.
    pub command: String,
    /// Argument patterns; `*` matches any run of characters within one
    /// argument. An empty list leaves arguments unconstrained.
    #[serde(default)]
    pub args: Vec<String>,
}
