//! Default-deny evaluation of capability requests.
//!
//! Host services hold one [`CapabilityEvaluator`] and consult it with the
//! plugin's identifier and a [`CapabilityRequest`] before acting on the
//! plugin's behalf. The evaluator answers from the grants registered for
//! that plugin; unknown plugins, unmatched requests, and evaluation errors
//! (such as an uncanonicalizable path) all answer deny.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

use super::{Capabilities, FsPermission, NetProtocol, ProcessScope};

/// Tracing target for capability decisions.
const CAPABILITY_TARGET: &str = "menagerie_plugins::capability";

/// A query posed by a host service on behalf of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityRequest {
    /// Perform a filesystem operation on a path.
    Filesystem {
        /// Target path.
        path: PathBuf,
        /// Requested operation.
        permission: FsPermission,
    },
    /// Open an outbound connection.
    Egress {
        /// Transport protocol.
        protocol: NetProtocol,
        /// Destination host, as the plugin named it.
        host: String,
        /// Destination port.
        port: u16,
    },
    /// Accept an inbound connection.
    Ingress {
        /// Transport protocol.
        protocol: NetProtocol,
        /// Listening port.
        port: u16,
        /// Connecting origin: hostname or IP literal.
        origin: String,
    },
    /// Spawn a command.
    Exec {
        /// Command to run.
        command: String,
        /// Arguments to pass.
        args: Vec<String>,
    },
    /// Kill processes in a scope.
    Kill {
        /// Requested scope.
        scope: ProcessScope,
    },
    /// List processes in a scope.
    List {
        /// Requested scope.
        scope: ProcessScope,
    },
    /// Signal processes in a scope.
    Signal {
        /// Requested scope.
        scope: ProcessScope,
    },
}

impl std::fmt::Display for CapabilityRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filesystem { path, permission } => {
                write!(f, "filesystem {permission:?} on '{}'", path.display())
            }
            Self::Egress {
                protocol,
                host,
                port,
            } => write!(f, "egress {protocol} to {host}:{port}"),
            Self::Ingress {
                protocol,
                port,
                origin,
            } => write!(f, "ingress {protocol} on port {port} from {origin}"),
            Self::Exec { command, args } => write!(f, "exec '{command}' with args {args:?}"),
            Self::Kill { scope } => write!(f, "kill in scope {scope}"),
            Self::List { scope } => write!(f, "list in scope {scope}"),
            Self::Signal { scope } => write!(f, "signal in scope {scope}"),
        }
    }
}

/// Deny decision surfaced to host-service callers.
#[derive(Debug, Clone, Error)]
#[error("capability denied for plugin '{plugin}': {request}")]
pub struct CapabilityError {
    /// Plugin on whose behalf the request was made.
    pub plugin: String,
    /// The offending request.
    pub request: CapabilityRequest,
}

/// Evaluates capability requests against registered grants.
///
/// # Example
///
/// ```
/// use menagerie_plugins::capability::{
///     Capabilities, CapabilityEvaluator, CapabilityRequest, ProcessScope,
/// };
///
/// let evaluator = CapabilityEvaluator::new();
/// evaluator.register("cat", Capabilities::default());
///
/// // Empty capabilities deny everything.
/// let request = CapabilityRequest::Kill { scope: ProcessScope::Children };
/// assert!(!evaluator.is_allowed("cat", &request));
/// ```
#[derive(Debug, Default)]
pub struct CapabilityEvaluator {
    grants: RwLock<HashMap<String, Capabilities>>,
}

impl CapabilityEvaluator {
    /// Creates an evaluator with no registered plugins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the grants for a plugin.
    pub fn register(&self, plugin: impl Into<String>, capabilities: Capabilities) {
        let plugin = plugin.into();
        let mut grants = self.grants.write().unwrap_or_else(|poison| poison.into_inner());
        grants.insert(plugin, capabilities);
    }

    /// Removes a plugin's grants; subsequent queries deny.
    pub fn unregister(&self, plugin: &str) {
        let mut grants = self.grants.write().unwrap_or_else(|poison| poison.into_inner());
        grants.remove(plugin);
    }

    /// Answers a capability query; the default is deny.
    #[must_use]
    pub fn is_allowed(&self, plugin: &str, request: &CapabilityRequest) -> bool {
        let grants = self.grants.read().unwrap_or_else(|poison| poison.into_inner());
        let Some(capabilities) = grants.get(plugin) else {
            debug!(
                target: CAPABILITY_TARGET,
                plugin,
                %request,
                "deny: plugin has no registered capabilities"
            );
            return false;
        };

        let allowed = evaluate(capabilities, request);
        debug!(
            target: CAPABILITY_TARGET,
            plugin,
            %request,
            allowed,
            "capability decision"
        );
        allowed
    }

    /// Like [`CapabilityEvaluator::is_allowed`], but deny becomes a typed
    /// error carrying the offending request.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] on deny.
    pub fn check(&self, plugin: &str, request: &CapabilityRequest) -> Result<(), CapabilityError> {
        if self.is_allowed(plugin, request) {
            Ok(())
        } else {
            Err(CapabilityError {
                plugin: plugin.to_string(),
                request: request.clone(),
            })
        }
    }
}

fn evaluate(capabilities: &Capabilities, request: &CapabilityRequest) -> bool {
    match request {
        CapabilityRequest::Filesystem { path, permission } => capabilities
            .filesystem
            .iter()
            .any(|grant| fs_grant_allows(grant, path, *permission)),
        CapabilityRequest::Egress {
            protocol,
            host,
            port,
        } => capabilities.network.as_ref().is_some_and(|net| {
            net.egress.iter().any(|rule| {
                rule.protocol == *protocol
                    && rule.hosts.iter().any(|h| h == host)
                    && rule.ports.contains(port)
            })
        }),
        CapabilityRequest::Ingress {
            protocol,
            port,
            origin,
        } => capabilities.network.as_ref().is_some_and(|net| {
            net.ingress.iter().any(|rule| {
                rule.protocol == *protocol
                    && rule.ports.contains(port)
                    && rule
                        .allowed_origins
                        .iter()
                        .any(|allowed| origin_matches(allowed, origin))
            })
        }),
        CapabilityRequest::Exec { command, args } => capabilities.process.iter().any(|grant| {
            grant
                .exec
                .as_ref()
                .is_some_and(|rule| rule.command == *command && exec_args_match(&rule.args, args))
        }),
        CapabilityRequest::Kill { scope } => capabilities
            .process
            .iter()
            .any(|grant| grant.kill.contains(scope)),
        CapabilityRequest::List { scope } => capabilities
            .process
            .iter()
            .any(|grant| grant.list.contains(scope)),
        CapabilityRequest::Signal { scope } => capabilities
            .process
            .iter()
            .any(|grant| grant.signal.contains(scope)),
    }
}

/// Filesystem prefix check with symlinks resolved on both sides.
///
/// A path strictly deeper than the grant path additionally requires the
/// grant to be recursive. Canonicalization failure on either side denies.
fn fs_grant_allows(grant: &super::FsGrant, path: &Path, permission: FsPermission) -> bool {
    if !grant.permissions.contains(&permission) {
        return false;
    }
    let (Ok(grant_path), Ok(request_path)) = (grant.path.canonicalize(), canonicalize_request(path))
    else {
        return false;
    };
    if !request_path.starts_with(&grant_path) {
        return false;
    }
    request_path == grant_path || grant.recursive
}

/// Canonicalizes the requested path, tolerating a not-yet-existing final
/// component (relevant for `create` requests) by resolving its parent.
fn canonicalize_request(path: &Path) -> std::io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(_) => {
            let parent = path
                .parent()
                .ok_or_else(|| std::io::Error::other("path has no parent"))?;
            let file_name = path
                .file_name()
                .ok_or_else(|| std::io::Error::other("path has no file name"))?;
            Ok(parent.canonicalize()?.join(file_name))
        }
    }
}

/// Exact-host or CIDR-inclusion match for ingress origins.
fn origin_matches(allowed: &str, origin: &str) -> bool {
    if allowed == origin {
        return true;
    }
    let Some((network, prefix_len)) = parse_cidr(allowed) else {
        return false;
    };
    origin
        .parse::<IpAddr>()
        .is_ok_and(|ip| cidr_contains(network, prefix_len, ip))
}

fn parse_cidr(block: &str) -> Option<(IpAddr, u8)> {
    let (addr, len) = block.split_once('/')?;
    let network: IpAddr = addr.parse().ok()?;
    let prefix_len: u8 = len.parse().ok()?;
    let max = match network {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    (prefix_len <= max).then_some((network, prefix_len))
}

fn cidr_contains(network: IpAddr, prefix_len: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix_len))
            };
            u32::from(net) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix_len))
            };
            u128::from(net) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}

/// Positional argument matching: every argument must match its pattern,
/// where `*` in a pattern matches any run of characters. An empty pattern
/// list leaves arguments unconstrained.
fn exec_args_match(patterns: &[String], args: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.len() == args.len()
        && patterns
            .iter()
            .zip(args)
            .all(|(pattern, arg)| wildcard_match(pattern, arg))
}

/// Glob-style match supporting only the `*` metacharacter.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pieces: Vec<&str> = pattern.split('*').collect();
    if pieces.len() == 1 {
        return pattern == value;
    }

    let mut remainder = value;
    let first = pieces[0];
    if !first.is_empty() {
        let Some(rest) = remainder.strip_prefix(first) else {
            return false;
        };
        remainder = rest;
    }
    let last = pieces[pieces.len() - 1];
    if !last.is_empty() {
        let Some(rest) = remainder.strip_suffix(last) else {
            return false;
        };
        remainder = rest;
    }
    for piece in &pieces[1..pieces.len() - 1] {
        if piece.is_empty() {
            continue;
        }
        match remainder.find(piece) {
            Some(index) => remainder = &remainder[index + piece.len()..],
            None => return false,
        }
    }
    true
}
