//! Glue to the external filesystem-watch collaborator.
//!
//! The registry does not react to filesystem events itself; invalidation is
//! the explicit [`crate::registry::PluginLoader::reload`] operation. This
//! adapter only registers interest in package directories and forwards
//! debounced change notifications to a caller-supplied callback, which may
//! choose to trigger a reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::Catalog;

/// Tracing target for watcher operations.
const WATCHER_TARGET: &str = "menagerie_plugins::watcher";

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A file or directory appeared.
    Created,
    /// Contents or metadata changed.
    Modified,
    /// A file or directory went away.
    Removed,
}

/// A debounced change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Path the event applies to.
    pub path: PathBuf,
    /// What happened.
    pub kind: WatchEventKind,
}

/// Errors from the watcher glue.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// The underlying watcher could not be created.
    #[error("failed to initialise filesystem watcher: {0}")]
    Init(#[source] notify::Error),

    /// A directory could not be registered.
    #[error("failed to watch '{path}': {source}")]
    Watch {
        /// Directory that was being registered.
        path: PathBuf,
        /// Underlying watcher error.
        #[source]
        source: notify::Error,
    },
}

/// Watches plugin package directories and forwards debounced events.
///
/// Dropping the watcher disconnects the event channel, which ends the
/// debounce thread.
pub struct PluginDirWatcher {
    watcher: RecommendedWatcher,
}

impl PluginDirWatcher {
    /// Creates a watcher forwarding events to `callback` after `debounce`.
    ///
    /// Events for the same path arriving within the debounce window are
    /// coalesced into one notification.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Init`] when the platform watcher cannot be
    /// created.
    pub fn new(
        debounce: Duration,
        callback: impl Fn(WatchEvent) + Send + 'static,
    ) -> Result<Self, WatcherError> {
        let (forward, raw_rx) = unbounded::<notify::Event>();

        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let _ = forward.send(event);
                }
                Err(err) => {
                    warn!(target: WATCHER_TARGET, error = %err, "filesystem watcher error");
                }
            }
        })
        .map_err(WatcherError::Init)?;

        std::thread::spawn(move || {
            let mut pending: HashMap<PathBuf, (WatchEventKind, Instant)> = HashMap::new();
            loop {
                let timeout = pending
                    .values()
                    .map(|(_, due)| due.saturating_duration_since(Instant::now()))
                    .min()
                    .unwrap_or(Duration::from_secs(3600));

                match raw_rx.recv_timeout(timeout) {
                    Ok(event) => {
                        if let Some(kind) = classify(&event.kind) {
                            let due = Instant::now() + debounce;
                            for path in event.paths {
                                pending.insert(path, (kind, due));
                            }
                        }
                    }
                    Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                }

                let now = Instant::now();
                let ready: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, (_, due))| *due <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in ready {
                    if let Some((kind, _)) = pending.remove(&path) {
                        debug!(
                            target: WATCHER_TARGET,
                            path = %path.display(),
                            ?kind,
                            "forwarding debounced change"
                        );
                        callback(WatchEvent { path, kind });
                    }
                }
            }
        });

        Ok(Self { watcher })
    }

    /// Registers one directory for interest (non-recursive).
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::Watch`] when registration fails.
    pub fn watch(&mut self, dir: &Path) -> Result<(), WatcherError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatcherError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;
        debug!(target: WATCHER_TARGET, dir = %dir.display(), "watching plugin directory");
        Ok(())
    }

    /// Registers every catalogued package directory.
    ///
    /// Returns the directories that failed to register; an empty vector
    /// means full coverage.
    pub fn watch_packages(&mut self, catalog: &Catalog) -> Vec<(PathBuf, WatcherError)> {
        let mut failures = Vec::new();
        for package_dir in catalog.snapshot().into_keys() {
            if let Err(err) = self.watch(&package_dir) {
                failures.push((package_dir, err));
            }
        }
        failures
    }
}

impl std::fmt::Debug for PluginDirWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDirWatcher").finish_non_exhaustive()
    }
}

fn classify(kind: &notify::EventKind) -> Option<WatchEventKind> {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Created),
        EventKind::Modify(_) => Some(WatchEventKind::Modified),
        EventKind::Remove(_) => Some(WatchEventKind::Removed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_event_kinds() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};

        assert_eq!(
            classify(&notify::EventKind::Create(CreateKind::File)),
            Some(WatchEventKind::Created)
        );
        assert_eq!(
            classify(&notify::EventKind::Modify(ModifyKind::Any)),
            Some(WatchEventKind::Modified)
        );
        assert_eq!(
            classify(&notify::EventKind::Remove(RemoveKind::File)),
            Some(WatchEventKind::Removed)
        );
        assert_eq!(classify(&notify::EventKind::Any), None);
    }

    #[test]
    fn forwards_debounced_file_events() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let (tx, rx) = crossbeam::channel::unbounded();

        let mut watcher = PluginDirWatcher::new(Duration::from_millis(50), move |event| {
            let _ = tx.send(event);
        })
        .expect("create watcher");
        watcher.watch(dir.path()).expect("watch dir");

        std::fs::write(dir.path().join("manifest.yaml"), "plugin: {}\n").expect("write file");

        let event = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("should observe an event");
        assert!(event.path.starts_with(dir.path()) || event.path.ends_with("manifest.yaml"));
    }
}
