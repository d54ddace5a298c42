//! Child-process supervision: launch, handshake, connection, termination.
//!
//! The supervisor turns a [`LaunchDescriptor`] into a connected
//! [`PluginClient`]. The launch sequence is:
//!
//! 1. Verify the entrypoint against its checksum descriptor, if present.
//! 2. Spawn the child with the magic-cookie environment variable and a
//!    fresh hex-encoded launch key in [`LAUNCH_KEY_ENV`].
//! 3. Read one newline-terminated handshake line from the child's stdout
//!    under a deadline.
//! 4. Validate the core and plugin protocol versions and the selected
//!    transport; for authenticated transports, verify the child's proof
//!    (the SHA-256 of the launch key followed by the cookie value).
//! 5. Connect to the advertised endpoint and wrap it in the negotiated
//!    transport.
//!
//! Any failing step kills the child before the error is surfaced; a failed
//! launch never leaves a stray process behind. Outstanding clients are
//! tracked so [`PluginSupervisor::cleanup_all`] can terminate everything.

pub mod error;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{RecvTimeoutError, bounded};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::handshake::{
    CORE_PROTOCOL_VERSION, HandshakeError, HandshakeLine, LAUNCH_KEY_ENV,
};
use crate::manifest::LaunchDescriptor;
use crate::registry::Catalog;
use crate::state::PluginState;
use crate::transport::{
    Connection, FramedConnection, MuxConnection, TransportError, TransportKind,
};

pub use self::error::{DispenseError, LaunchError, SupervisorError};

/// Tracing target for supervisor operations.
const SUPERVISOR_TARGET: &str = "menagerie_plugins::supervisor";

/// Default deadline for the child handshake line.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default grace period between closing the transport and killing the child.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Deadline for connecting to the endpoint a child advertised.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for a child to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// The closed set of plugin contracts this host can dispense.
///
/// Host extension happens by adding a variant here, not by dynamic
/// registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginContract {
    /// The animal contract over framed-rpc.
    Animal,
    /// The animal contract over multiplexed streams.
    AnimalStream,
}

impl PluginContract {
    /// Parses a plugin-type tag; returns `None` for unknown tags.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "animal" => Some(Self::Animal),
            "animal-stream" => Some(Self::AnimalStream),
            _ => None,
        }
    }

    /// Returns the canonical tag.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Animal => "animal",
            Self::AnimalStream => "animal-stream",
        }
    }

    /// Whether the contract can be carried over the given transport.
    #[must_use]
    pub const fn supports(self, transport: TransportKind) -> bool {
        match self {
            Self::Animal => matches!(transport, TransportKind::FramedRpc),
            Self::AnimalStream => true,
        }
    }
}

/// The negotiated wire session of a connected plugin.
#[derive(Debug)]
enum ClientConnection {
    Framed(FramedConnection<Connection>),
    Mux(MuxConnection<Connection>),
}

/// A typed service stub borrowed from a connected client.
///
/// One variant exists per supported transport-contract pair.
#[derive(Debug)]
pub enum ServiceStub<'c> {
    /// The animal contract spoken over framed-rpc.
    AnimalFramed(&'c mut FramedConnection<Connection>),
    /// The animal contract spoken over multiplexed streams.
    AnimalStream(&'c mut MuxConnection<Connection>),
}

impl ServiceStub<'_> {
    /// Issues one request and returns the plugin's response.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on wire failure.
    pub fn call(&mut self, method: &str, params: Value) -> Result<Value, TransportError> {
        let request = serde_json::json!({ "method": method, "params": params });
        match self {
            Self::AnimalFramed(session) => session.call(&request),
            Self::AnimalStream(session) => session.call(&request),
        }
    }
}

/// A launched, connected plugin child.
#[derive(Debug)]
pub struct PluginClient {
    name: String,
    contract: String,
    transport: TransportKind,
    child: Option<Child>,
    connection: Option<ClientConnection>,
    grace: Duration,
}

impl PluginClient {
    /// Returns the plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the transport negotiated at handshake.
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Dispenses a typed service stub for the given plugin-type tag.
    ///
    /// # Errors
    ///
    /// Returns a [`DispenseError`] when the tag is unknown, does not match
    /// the plugin's manifest, cannot be carried over the negotiated
    /// transport, or when the client has been killed.
    pub fn dispense(&mut self, tag: &str) -> Result<ServiceStub<'_>, DispenseError> {
        let contract =
            PluginContract::from_tag(tag).ok_or_else(|| DispenseError::UnknownContract {
                tag: tag.to_string(),
            })?;
        if tag != self.contract {
            return Err(DispenseError::ContractMismatch {
                served: self.contract.clone(),
                requested: tag.to_string(),
            });
        }
        if !contract.supports(self.transport) {
            return Err(DispenseError::ContractUnsupported {
                tag: tag.to_string(),
                transport: self.transport,
            });
        }
        match self.connection.as_mut() {
            Some(ClientConnection::Framed(session)) => Ok(ServiceStub::AnimalFramed(session)),
            Some(ClientConnection::Mux(session)) => Ok(ServiceStub::AnimalStream(session)),
            None => Err(DispenseError::Disconnected),
        }
    }

    /// Reports whether the child has exited, without blocking.
    ///
    /// Returns the exit code when the child is gone. An exit observed while
    /// the client still believes itself connected is the
    /// [`PluginState::StoppedUnexpectedly`] signal.
    #[must_use]
    pub fn poll_exit(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(err) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    plugin = %self.name,
                    error = %err,
                    "failed to poll child status"
                );
                None
            }
        }
    }

    /// Terminates the plugin: closes the transport as the graceful
    /// shutdown signal, waits out the grace period, then kills the child.
    ///
    /// Idempotent; a second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::KillFailed`] when the child survives the
    /// grace period and cannot be killed.
    pub fn kill(&mut self) -> Result<(), SupervisorError> {
        // Dropping the connection closes the socket; a well-behaved plugin
        // treats EOF as the shutdown signal.
        self.connection = None;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let deadline = std::time::Instant::now() + self.grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        plugin = %self.name,
                        ?status,
                        "plugin exited gracefully"
                    );
                    return Ok(());
                }
                Ok(None) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(EXIT_POLL_INTERVAL);
                }
                Ok(None) => {
                    warn!(
                        target: SUPERVISOR_TARGET,
                        plugin = %self.name,
                        grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
                        "plugin ignored shutdown, killing"
                    );
                    child.kill().map_err(|source| SupervisorError::KillFailed {
                        name: self.name.clone(),
                        source: Arc::new(source),
                    })?;
                    let _ = child.wait();
                    return Ok(());
                }
                Err(source) => {
                    child.kill().map_err(|kill_err| SupervisorError::KillFailed {
                        name: self.name.clone(),
                        source: Arc::new(kill_err),
                    })?;
                    let _ = child.wait();
                    return Err(SupervisorError::KillFailed {
                        name: self.name.clone(),
                        source: Arc::new(source),
                    });
                }
            }
        }
    }
}

impl Drop for PluginClient {
    fn drop(&mut self) {
        if self.child.is_some() {
            let _ = self.kill();
        }
    }
}

/// Launches plugin children and owns the resulting client handles.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use menagerie_plugins::supervisor::PluginSupervisor;
/// # let descriptor: menagerie_plugins::manifest::LaunchDescriptor = todo!();
///
/// let supervisor = PluginSupervisor::new(Duration::from_millis(1000));
/// let client = supervisor.launch(&descriptor)?;
/// let mut guard = client.lock().expect("client lock");
/// let mut stub = guard.dispense("animal")?;
/// let response = stub.call("speak", serde_json::json!({"loud": false}))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct PluginSupervisor {
    handshake_timeout: Duration,
    grace: Duration,
    clients: Mutex<HashMap<String, Arc<Mutex<PluginClient>>>>,
}

impl PluginSupervisor {
    /// Creates a supervisor with the given handshake deadline.
    #[must_use]
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            grace: DEFAULT_GRACE_PERIOD,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the grace period applied before force-killing children.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Launches a plugin and returns its connected client handle.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchError`] naming the failing step. The child is
    /// never left running on failure.
    pub fn launch(
        &self,
        descriptor: &LaunchDescriptor,
    ) -> Result<Arc<Mutex<PluginClient>>, LaunchError> {
        let name = descriptor.name.as_str();
        if descriptor.allowed_transports.is_empty() {
            return Err(SupervisorError::NoAllowedTransports {
                name: name.to_string(),
            }
            .into());
        }

        if let Some(checksum) = &descriptor.checksum {
            checksum.verify_file(&descriptor.command)?;
        }

        let launch_key: [u8; 32] = rand::random();
        let mut child = self.spawn_child(descriptor, &launch_key)?;

        let line = match self.read_handshake_line(name, &mut child) {
            Ok(line) => line,
            Err(err) => {
                abort_launch(&mut child);
                return Err(err);
            }
        };

        let handshake = match HandshakeLine::parse(&line) {
            Ok(handshake) => handshake,
            Err(err) => {
                abort_launch(&mut child);
                return Err(err.into());
            }
        };

        if let Err(err) = validate_handshake(descriptor, &handshake, &launch_key) {
            abort_launch(&mut child);
            return Err(err.into());
        }

        let connection = match Connection::connect(&handshake.endpoint, CONNECT_TIMEOUT) {
            Ok(connection) => connection,
            Err(source) => {
                abort_launch(&mut child);
                return Err(LaunchError::Connect {
                    name: name.to_string(),
                    endpoint: handshake.endpoint.to_string(),
                    source: Arc::new(source),
                });
            }
        };

        let session = match handshake.transport {
            TransportKind::FramedRpc => ClientConnection::Framed(FramedConnection::new(connection)),
            TransportKind::StreamRpc => ClientConnection::Mux(MuxConnection::new(connection)),
        };

        debug!(
            target: SUPERVISOR_TARGET,
            plugin = name,
            transport = %handshake.transport,
            endpoint = %handshake.endpoint,
            "plugin connected"
        );

        let client = Arc::new(Mutex::new(PluginClient {
            name: name.to_string(),
            contract: descriptor.contract.clone(),
            transport: handshake.transport,
            child: Some(child),
            connection: Some(session),
            grace: self.grace,
        }));

        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        clients.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Terminates one outstanding plugin by name.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::KillFailed`] when termination fails; the
    /// handle is dropped either way.
    pub fn kill(&self, name: &str) -> Result<(), SupervisorError> {
        let client = {
            let mut clients = self
                .clients
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            clients.remove(name)
        };
        match client {
            Some(client) => {
                let mut guard = client.lock().unwrap_or_else(|poison| poison.into_inner());
                guard.kill()
            }
            None => Ok(()),
        }
    }

    /// Applies [`PluginSupervisor::kill`] to every outstanding handle.
    pub fn cleanup_all(&self) {
        let drained: Vec<(String, Arc<Mutex<PluginClient>>)> = {
            let mut clients = self
                .clients
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            clients.drain().collect()
        };
        for (name, client) in drained {
            let mut guard = client.lock().unwrap_or_else(|poison| poison.into_inner());
            if let Err(err) = guard.kill() {
                warn!(
                    target: SUPERVISOR_TARGET,
                    plugin = %name,
                    error = %err,
                    "failed to terminate plugin during cleanup"
                );
            }
        }
    }

    fn spawn_child(
        &self,
        descriptor: &LaunchDescriptor,
        launch_key: &[u8; 32],
    ) -> Result<Child, SupervisorError> {
        let mut command = Command::new(&descriptor.command);
        command
            .args(&descriptor.args)
            .env(
                &descriptor.handshake.magic_cookie_key,
                &descriptor.handshake.magic_cookie_value,
            )
            .env(LAUNCH_KEY_ENV, hex::encode(launch_key))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            target: SUPERVISOR_TARGET,
            plugin = %descriptor.name,
            command = %descriptor.command.display(),
            "spawning plugin child"
        );

        command.spawn().map_err(|source| SupervisorError::SpawnFailed {
            name: descriptor.name.clone(),
            message: format!("failed to spawn '{}'", descriptor.command.display()),
            source: Some(Arc::new(source)),
        })
    }

    /// Reads the first stdout line under the handshake deadline.
    ///
    /// The read happens on a helper thread so the deadline holds even when
    /// the child produces nothing; after the handshake the same thread
    /// keeps draining stdout into debug logs.
    fn read_handshake_line(&self, name: &str, child: &mut Child) -> Result<String, LaunchError> {
        let stdout = child.stdout.take().ok_or_else(|| SupervisorError::SpawnFailed {
            name: name.to_string(),
            message: String::from("failed to capture stdout"),
            source: None,
        })?;
        if let Some(stderr) = child.stderr.take() {
            drain_child_stream(name.to_string(), "stderr", stderr);
        }

        let (sender, receiver) = bounded::<std::io::Result<String>>(1);
        let plugin = name.to_string();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            let result = reader.read_line(&mut line).map(|_| line);
            let _ = sender.send(result);
            drain_lines(&plugin, "stdout", reader);
        });

        match receiver.recv_timeout(self.handshake_timeout) {
            Ok(Ok(line)) if !line.trim().is_empty() => Ok(line),
            Ok(Ok(_)) => {
                // EOF or a blank line: the child went away without talking.
                let status = child.try_wait().ok().flatten().and_then(|s| s.code());
                Err(SupervisorError::ChildExitedEarly {
                    name: name.to_string(),
                    status,
                }
                .into())
            }
            Ok(Err(source)) => Err(SupervisorError::SpawnFailed {
                name: name.to_string(),
                message: String::from("failed to read handshake from stdout"),
                source: Some(Arc::new(source)),
            }
            .into()),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                Err(HandshakeError::TimedOut {
                    name: name.to_string(),
                    waited_ms: u64::try_from(self.handshake_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                }
                .into())
            }
        }
    }
}

/// Launches a catalogued package, recording lifecycle transitions.
///
/// The catalog is passed by reference; neither the supervisor nor the
/// catalog stores a pointer to the other.
///
/// # Errors
///
/// Returns [`LaunchError::NotCatalogued`] for unknown packages, otherwise
/// whatever [`PluginSupervisor::launch`] returns. On failure the package
/// state is [`PluginState::FailedToLaunch`].
pub fn launch_from_catalog(
    supervisor: &PluginSupervisor,
    catalog: &Catalog,
    package_dir: &Path,
) -> Result<Arc<Mutex<PluginClient>>, LaunchError> {
    let entry = catalog
        .get(package_dir)
        .ok_or_else(|| LaunchError::NotCatalogued {
            package_dir: package_dir.to_path_buf(),
        })?;
    let descriptor = entry.launch_descriptor()?;

    let _ = catalog.set_state(package_dir, PluginState::Launching);
    match supervisor.launch(&descriptor) {
        Ok(client) => {
            let _ = catalog.set_state(package_dir, PluginState::Running);
            Ok(client)
        }
        Err(err) => {
            let _ = catalog.set_state(package_dir, PluginState::FailedToLaunch);
            Err(err)
        }
    }
}

/// Polls a supervised plugin and records an unexpected exit.
///
/// When the child has exited while the catalog still believes the plugin
/// is running, the package transitions to
/// [`PluginState::StoppedUnexpectedly`]. Returns the observed exit code
/// when the child is gone.
pub fn observe_exit(
    catalog: &Catalog,
    package_dir: &Path,
    client: &Arc<Mutex<PluginClient>>,
) -> Option<Option<i32>> {
    let mut guard = client.lock().unwrap_or_else(|poison| poison.into_inner());
    let exited = guard.poll_exit()?;
    if catalog.state(package_dir) == PluginState::Running {
        warn!(
            target: SUPERVISOR_TARGET,
            plugin = %guard.name,
            package_dir = %package_dir.display(),
            status = ?exited,
            "plugin exited unexpectedly"
        );
        let _ = catalog.set_state(package_dir, PluginState::StoppedUnexpectedly);
    }
    Some(exited)
}

/// Validates a parsed handshake line against the descriptor's expectations.
pub(crate) fn validate_handshake(
    descriptor: &LaunchDescriptor,
    handshake: &HandshakeLine,
    launch_key: &[u8; 32],
) -> Result<(), HandshakeError> {
    if handshake.core_protocol != CORE_PROTOCOL_VERSION {
        return Err(HandshakeError::ProtocolMismatch {
            what: "core",
            expected: CORE_PROTOCOL_VERSION,
            actual: handshake.core_protocol,
        });
    }
    if handshake.plugin_protocol != descriptor.handshake.protocol_version {
        return Err(HandshakeError::ProtocolMismatch {
            what: "plugin",
            expected: descriptor.handshake.protocol_version,
            actual: handshake.plugin_protocol,
        });
    }
    if !descriptor.allowed_transports.contains(&handshake.transport) {
        return Err(HandshakeError::TransportNotAllowed {
            requested: handshake.transport,
            allowed: descriptor.allowed_transports.clone(),
        });
    }
    if descriptor.require_authenticated_transport {
        let expected = expected_proof(launch_key, &descriptor.handshake.magic_cookie_value);
        match &handshake.server_proof {
            Some(proof) if *proof == expected => {}
            Some(_) => {
                return Err(HandshakeError::AuthenticationFailed {
                    name: descriptor.name.clone(),
                    message: String::from("launch-key proof does not verify"),
                });
            }
            None => {
                return Err(HandshakeError::AuthenticationFailed {
                    name: descriptor.name.clone(),
                    message: String::from("handshake carries no proof field"),
                });
            }
        }
    }
    Ok(())
}

/// The proof an authenticated child must present: the hex SHA-256 of the
/// launch key bytes followed by the magic-cookie value.
pub(crate) fn expected_proof(launch_key: &[u8], cookie_value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(launch_key);
    hasher.update(cookie_value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Kills a half-launched child so no process outlives a failed launch.
fn abort_launch(child: &mut Child) {
    if child.try_wait().ok().flatten().is_none() {
        let _ = child.kill();
    }
    let _ = child.wait();
}

fn drain_child_stream(plugin: String, stream_name: &'static str, stream: impl Read + Send + 'static) {
    std::thread::spawn(move || {
        drain_lines(&plugin, stream_name, BufReader::new(stream));
    });
}

fn drain_lines(plugin: &str, stream_name: &str, reader: impl BufRead) {
    for line in reader.lines() {
        match line {
            Ok(line) if !line.is_empty() => {
                debug!(
                    target: SUPERVISOR_TARGET,
                    plugin = %plugin,
                    stream = stream_name,
                    output = %line,
                    "plugin output"
                );
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
}
