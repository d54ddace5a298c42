//! Plugin package discovery and the thread-safe catalog.
//!
//! The registry walks a plugins root (one directory per package), loads
//! each package's manifest and optional checksum sidecar, and records the
//! results in a [`Catalog`]. A package that fails to load is never fatal:
//! its failure is recorded in the returned [`LoaderErrors`] map and as a
//! failure state in the catalog, so operators can observe misinstalled
//! plugins alongside healthy ones.
//!
//! All file access during a scan is confined to the canonicalized plugins
//! root via [`ScopedRoot`]; candidate paths that resolve outside the root
//! are rejected rather than followed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::{IntegrityError, ManifestError};
use crate::integrity::{ChecksumDescriptor, sidecar_file_name};
use crate::manifest::{LaunchDescriptor, Manifest, ManifestHash};
use crate::state::{InvalidTransition, PluginState};

/// Tracing target for registry operations.
const REGISTRY_TARGET: &str = "menagerie_plugins::registry";

/// Per-package failures accumulated during a scan, keyed by the absolute
/// package directory (or the root itself, when the root is unusable).
pub type LoaderErrors = HashMap<PathBuf, LoaderError>;

/// Failure to load one plugin package (or to open the plugins root).
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// The plugins root does not exist or is not a directory.
    #[error("invalid plugins root '{path}': {message}")]
    InvalidRoot {
        /// Path that was attempted.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// Enumerating the plugins root failed.
    #[error("failed to scan plugins root '{path}': {source}")]
    Scan {
        /// Path that was being scanned.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A candidate path resolved outside the plugins root.
    #[error("path '{path}' resolves outside the plugins root '{root}'")]
    OutsideRoot {
        /// Offending path.
        path: PathBuf,
        /// Root it escaped.
        root: PathBuf,
    },

    /// The manifest's format tag maps to no usable transport.
    #[error("package '{package_dir}' declares unknown plugin format '{format}'")]
    UnknownFormat {
        /// Package directory.
        package_dir: PathBuf,
        /// The unrecognised format tag.
        format: String,
    },

    /// The package's manifest failed to load or validate.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The package's checksum sidecar failed to parse.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

impl LoaderError {
    /// Maps a load failure to the plugin failure state it implies.
    #[must_use]
    pub fn failure_state(&self) -> PluginState {
        match self {
            Self::InvalidRoot { .. } | Self::Scan { .. } | Self::OutsideRoot { .. } => {
                PluginState::Unknown
            }
            Self::UnknownFormat { .. } => PluginState::InvalidLaunchDescriptor,
            Self::Manifest(err) => match err {
                ManifestError::NotFound { .. } => PluginState::MissingManifest,
                ManifestError::EntrypointMissing { .. } => PluginState::MissingBinary,
                ManifestError::EntrypointNotExecutable { .. } => PluginState::InvalidBinary,
                ManifestError::Read { .. } | ManifestError::Parse { .. } => {
                    PluginState::InvalidManifest
                }
                ManifestError::InvalidProtocolVersion { .. }
                | ManifestError::InvalidMagicCookieKey
                | ManifestError::InvalidMagicCookieValue => PluginState::InvalidLaunchDescriptor,
            },
            Self::Integrity(err) => match err {
                IntegrityError::ChecksumMissing { .. } => PluginState::MissingChecksum,
                IntegrityError::ChecksumMalformed { .. } => PluginState::InvalidChecksum,
                IntegrityError::ChecksumMismatch { .. } => PluginState::ChecksumMismatch,
            },
        }
    }
}

/// A scan scope rooted at the canonicalized plugins directory.
///
/// Candidate paths are canonicalized and prefix-checked before use, so a
/// symlinked package cannot drag the scan outside the root.
#[derive(Debug, Clone)]
pub struct ScopedRoot {
    root: PathBuf,
}

impl ScopedRoot {
    /// Opens the plugins root.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidRoot`] when the path cannot be
    /// canonicalized or is not a directory.
    pub fn open(path: &Path) -> Result<Self, LoaderError> {
        let root = path.canonicalize().map_err(|err| LoaderError::InvalidRoot {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if !root.is_dir() {
            return Err(LoaderError::InvalidRoot {
                path: path.to_path_buf(),
                message: String::from("not a directory"),
            });
        }
        Ok(Self { root })
    }

    /// Returns the canonical root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerates the immediate subdirectories: the candidate packages.
    ///
    /// Candidates are returned as found; callers confine each one before
    /// touching its contents.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::Scan`] when the root cannot be read.
    pub fn packages(&self) -> Result<Vec<PathBuf>, LoaderError> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| LoaderError::Scan {
            path: self.root.clone(),
            source: Arc::new(source),
        })?;

        let mut packages = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LoaderError::Scan {
                path: self.root.clone(),
                source: Arc::new(source),
            })?;
            let path = entry.path();
            if path.is_dir() {
                packages.push(path);
            }
        }
        packages.sort();
        Ok(packages)
    }

    /// Canonicalizes `path` and confirms it stays under the root.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::OutsideRoot`] for escapees.
    pub fn confine(&self, path: &Path) -> Result<PathBuf, LoaderError> {
        let resolved = path.canonicalize().map_err(|err| LoaderError::InvalidRoot {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(LoaderError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            });
        }
        Ok(resolved)
    }
}

/// An immutable catalog record for one successfully loaded package.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    manifest: Manifest,
    entrypoint: PathBuf,
    hash: ManifestHash,
    package_dir: PathBuf,
    checksum: Option<ChecksumDescriptor>,
}

impl ManifestEntry {
    /// Returns the parsed manifest.
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Returns the canonical absolute entrypoint path.
    #[must_use]
    pub fn entrypoint(&self) -> &Path {
        &self.entrypoint
    }

    /// Returns the hash of the raw manifest bytes.
    #[must_use]
    pub const fn hash(&self) -> ManifestHash {
        self.hash
    }

    /// Returns the absolute package directory.
    #[must_use]
    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    /// Returns the checksum expectation, when a sidecar was present.
    #[must_use]
    pub const fn checksum(&self) -> Option<&ChecksumDescriptor> {
        self.checksum.as_ref()
    }

    /// Derives the launch descriptor for this entry.
    ///
    /// Unlike [`Manifest::to_launch_descriptor`], the command is the
    /// resolved absolute entrypoint, and the checksum expectation is
    /// attached when the package shipped a sidecar.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Manifest::to_launch_descriptor`].
    pub fn launch_descriptor(&self) -> Result<LaunchDescriptor, ManifestError> {
        let mut descriptor = self.manifest.to_launch_descriptor()?;
        descriptor.command = self.entrypoint.clone();
        descriptor.checksum = self.checksum.clone();
        Ok(descriptor)
    }
}

#[derive(Debug, Default)]
struct CatalogInner {
    entries: HashMap<PathBuf, Arc<ManifestEntry>>,
    states: HashMap<PathBuf, PluginState>,
}

/// The thread-safe catalog of loaded plugin metadata.
///
/// Entries are immutable snapshots behind `Arc`; a reload replaces the
/// stored entry without invalidating references handed out earlier.
/// Reads and writes go through a single reader-writer lock, so readers
/// observe either the pre- or post-update map, never a partial one.
#[derive(Debug, Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the entry for a package directory.
    #[must_use]
    pub fn get(&self, package_dir: &Path) -> Option<Arc<ManifestEntry>> {
        let inner = self.read();
        inner.entries.get(package_dir).cloned()
    }

    /// Finds the entry whose manifest declares the given plugin name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<ManifestEntry>> {
        let inner = self.read();
        inner
            .entries
            .values()
            .find(|entry| entry.manifest().plugin.name == name)
            .cloned()
    }

    /// Returns an independent snapshot of the entry map.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<PathBuf, Arc<ManifestEntry>> {
        self.read().entries.clone()
    }

    /// Returns the lifecycle state recorded for a package.
    #[must_use]
    pub fn state(&self, package_dir: &Path) -> PluginState {
        self.read()
            .states
            .get(package_dir)
            .copied()
            .unwrap_or_default()
    }

    /// Records a lifecycle transition for a package.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] and leaves the recorded state
    /// untouched when the transition is illegal.
    pub fn set_state(&self, package_dir: &Path, next: PluginState) -> Result<(), InvalidTransition> {
        let mut inner = self.write();
        let current = inner
            .states
            .get(package_dir)
            .copied()
            .unwrap_or_default();
        if !current.can_transition_to(next) {
            warn!(
                target: REGISTRY_TARGET,
                package_dir = %package_dir.display(),
                from = %current,
                to = %next,
                "rejected illegal state transition"
            );
            return Err(InvalidTransition {
                from: current,
                to: next,
            });
        }
        inner.states.insert(package_dir.to_path_buf(), next);
        Ok(())
    }

    /// Resets a package to [`PluginState::Unknown`], the only legal exit
    /// from a failure state.
    pub fn reset(&self, package_dir: &Path) {
        let mut inner = self.write();
        inner
            .states
            .insert(package_dir.to_path_buf(), PluginState::Unknown);
    }

    /// Returns the number of catalogued packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Returns `true` when the catalog holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    fn insert(&self, entry: ManifestEntry) {
        let mut inner = self.write();
        inner
            .entries
            .insert(entry.package_dir.clone(), Arc::new(entry));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogInner> {
        self.inner.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogInner> {
        self.inner.write().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Discovers and loads plugin packages beneath a plugins root.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use menagerie_plugins::registry::PluginLoader;
///
/// let loader = PluginLoader::new(Path::new("/srv/plugins"));
/// let (entries, failures) = loader.load();
/// for (dir, err) in &failures {
///     eprintln!("skipping {}: {err}", dir.display());
/// }
/// println!("{} plugins available", entries.len());
/// ```
#[derive(Debug)]
pub struct PluginLoader {
    root: PathBuf,
    catalog: Arc<Catalog>,
}

impl PluginLoader {
    /// Creates a loader for the given plugins root. No I/O happens until
    /// [`PluginLoader::load`].
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            catalog: Arc::new(Catalog::new()),
        }
    }

    /// Returns the shared catalog this loader populates.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    /// Scans the plugins root, returning a snapshot of the loaded entries
    /// and the per-package failures.
    ///
    /// A failing package never aborts the scan; its error lands in the
    /// returned map and its failure state in the catalog. A failing *root*
    /// yields an empty snapshot and a single error keyed by the root path.
    #[must_use]
    pub fn load(&self) -> (HashMap<PathBuf, Arc<ManifestEntry>>, LoaderErrors) {
        let mut failures = LoaderErrors::new();

        let scope = match ScopedRoot::open(&self.root) {
            Ok(scope) => scope,
            Err(err) => {
                error!(
                    target: REGISTRY_TARGET,
                    root = %self.root.display(),
                    error = %err,
                    "failed to open plugins root"
                );
                failures.insert(self.root.clone(), err);
                return (self.catalog.snapshot(), failures);
            }
        };

        let packages = match scope.packages() {
            Ok(packages) => packages,
            Err(err) => {
                error!(
                    target: REGISTRY_TARGET,
                    root = %scope.root().display(),
                    error = %err,
                    "failed to enumerate plugin packages"
                );
                failures.insert(scope.root().to_path_buf(), err);
                return (self.catalog.snapshot(), failures);
            }
        };

        for candidate in packages {
            let package_dir = match scope.confine(&candidate) {
                Ok(confined) => confined,
                Err(err) => {
                    warn!(
                        target: REGISTRY_TARGET,
                        candidate = %candidate.display(),
                        error = %err,
                        "rejected plugin package candidate"
                    );
                    failures.insert(candidate, err);
                    continue;
                }
            };
            match self.load_package(&package_dir) {
                Ok(entry) => {
                    debug!(
                        target: REGISTRY_TARGET,
                        package_dir = %package_dir.display(),
                        name = %entry.manifest().plugin.name,
                        hash = %entry.hash(),
                        "catalogued plugin package"
                    );
                    self.catalog.insert(entry);
                }
                Err(err) => {
                    warn!(
                        target: REGISTRY_TARGET,
                        package_dir = %package_dir.display(),
                        error = %err,
                        "failed to load plugin package"
                    );
                    let failed = err.failure_state();
                    self.catalog.reset(&package_dir);
                    let _ = self.catalog.set_state(&package_dir, failed);
                    failures.insert(package_dir, err);
                }
            }
        }

        (self.catalog.snapshot(), failures)
    }

    /// Re-scans the plugins root, replacing prior entries.
    ///
    /// Entries handed out before the reload remain valid snapshots.
    #[must_use]
    pub fn reload(&self) -> (HashMap<PathBuf, Arc<ManifestEntry>>, LoaderErrors) {
        self.load()
    }

    fn load_package(&self, package_dir: &Path) -> Result<ManifestEntry, LoaderError> {
        let catalog = &self.catalog;
        catalog.reset(package_dir);
        let _ = catalog.set_state(package_dir, PluginState::DirectoryDiscovered);

        let (manifest, entrypoint, hash) = Manifest::load(package_dir)?;
        let _ = catalog.set_state(package_dir, PluginState::DataLoaded);

        // A sidecar is optional; a present-but-malformed one fails the package.
        let sidecar = sidecar_file_name(&manifest.plugin.entrypoint);
        let checksum = if package_dir.join(&sidecar).exists() {
            Some(ChecksumDescriptor::load(package_dir, &sidecar)?)
        } else {
            None
        };
        let _ = catalog.set_state(package_dir, PluginState::ManifestValidated);

        let entry = ManifestEntry {
            manifest,
            entrypoint,
            hash,
            package_dir: package_dir.to_path_buf(),
            checksum,
        };

        // The descriptor must derive cleanly and name at least one usable
        // transport before the plugin is considered launchable.
        let descriptor = entry.launch_descriptor()?;
        if descriptor.allowed_transports.is_empty() {
            return Err(LoaderError::UnknownFormat {
                package_dir: package_dir.to_path_buf(),
                format: entry.manifest.plugin.format.clone(),
            });
        }

        let _ = catalog.set_state(package_dir, PluginState::Available);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests;
