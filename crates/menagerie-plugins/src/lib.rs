//! Plugin registry, supervision, and capability brokering for menagerie.
//!
//! The `menagerie-plugins` crate implements the host side of the plugin
//! runtime. Plugin packages live under a plugins root, one directory per
//! package, each carrying a `manifest.yaml`, an executable entrypoint, and
//! an optional checksum sidecar. The [`registry::PluginLoader`] discovers
//! and validates packages into an immutable [`registry::Catalog`]; the
//! [`supervisor::PluginSupervisor`] launches catalogued plugins as child
//! processes, brokers the single-line stdout handshake, connects over the
//! negotiated transport, and hands back a client that dispenses typed
//! service stubs.
//!
//! Host services consult the [`capability::CapabilityEvaluator`] before
//! acting on a plugin's behalf; everything a manifest does not grant is
//! denied.
//!
//! # Architecture
//!
//! The embedder owns the `Catalog`, the `PluginSupervisor`, and the
//! `CapabilityEvaluator`, and passes plain identifiers (package directory,
//! plugin name) between them; no component stores a reference to another.
//! Structured logging flows through `tracing` with per-module targets; the
//! embedding binary installs the subscriber.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::time::Duration;
//!
//! use menagerie_plugins::registry::PluginLoader;
//! use menagerie_plugins::supervisor::{PluginSupervisor, launch_from_catalog};
//!
//! let loader = PluginLoader::new(Path::new("/srv/plugins"));
//! let (entries, failures) = loader.load();
//! for (dir, err) in &failures {
//!     eprintln!("skipping {}: {err}", dir.display());
//! }
//!
//! let supervisor = PluginSupervisor::new(Duration::from_millis(1000));
//! let catalog = loader.catalog();
//! for dir in entries.keys() {
//!     match launch_from_catalog(&supervisor, &catalog, dir) {
//!         Ok(_client) => println!("launched {}", dir.display()),
//!         Err(err) => eprintln!("launch failed: {err}"),
//!     }
//! }
//! supervisor.cleanup_all();
//! ```

pub mod capability;
pub mod error;
pub mod handshake;
pub mod integrity;
pub mod manifest;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod transport;
pub mod version;
pub mod watcher;

pub use self::capability::{Capabilities, CapabilityError, CapabilityEvaluator, CapabilityRequest};
pub use self::error::{IntegrityError, ManifestError};
pub use self::handshake::{HandshakeConfig, HandshakeError, HandshakeLine};
pub use self::integrity::ChecksumDescriptor;
pub use self::manifest::{LaunchDescriptor, Manifest, ManifestHash};
pub use self::registry::{Catalog, LoaderError, LoaderErrors, ManifestEntry, PluginLoader};
pub use self::state::PluginState;
pub use self::supervisor::{
    LaunchError, PluginClient, PluginContract, PluginSupervisor, ServiceStub, SupervisorError,
};
pub use self::transport::TransportKind;
pub use self::version::Version;
