//! The plugin lifecycle state machine.
//!
//! A plugin progresses through discovery and validation states while the
//! registry loads it, then through launch states while the supervisor owns
//! it. Failure states are terminal: once a plugin has failed, the only legal
//! transition is an explicit reset back to [`PluginState::Unknown`] (for
//! example before a registry reload).

use strum::Display;
use thiserror::Error;

/// Lifecycle states of a plugin package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PluginState {
    /// Nothing is known about the package yet; the initial state.
    #[default]
    Unknown,
    /// The package directory has been located but not yet scanned.
    DirectoryDiscovered,
    /// The package directory has been enumerated.
    DirectoryScanned,
    /// The required files were found in the package directory.
    DirectoryValidated,
    /// The manifest bytes have been read and hashed.
    DataLoaded,
    /// The manifest parsed and passed validation.
    ManifestValidated,
    /// The plugin is ready to be launched.
    Available,
    /// The supervisor is spawning and handshaking the plugin.
    Launching,
    /// The plugin is connected and serving.
    Running,
    /// The plugin was stopped deliberately.
    Stopped,

    /// No manifest file exists in the package.
    MissingManifest,
    /// The checksum sidecar is expected but absent or unreadable.
    MissingChecksum,
    /// The entrypoint binary is absent.
    MissingBinary,
    /// The manifest exists but is malformed or invalid.
    InvalidManifest,
    /// The manifest cannot produce a usable launch descriptor.
    InvalidLaunchDescriptor,
    /// The checksum sidecar is present but malformed.
    InvalidChecksum,
    /// The entrypoint exists but is not an executable file.
    InvalidBinary,
    /// The entrypoint's digest does not match the sidecar.
    ChecksumMismatch,
    /// A launch step failed.
    FailedToLaunch,
    /// The plugin could not be terminated.
    FailedToStop,
    /// The plugin exited while it was supposed to be running.
    StoppedUnexpectedly,
}

impl PluginState {
    /// Returns `true` for the disjoint set of failure states.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::MissingManifest
                | Self::MissingChecksum
                | Self::MissingBinary
                | Self::InvalidManifest
                | Self::InvalidLaunchDescriptor
                | Self::InvalidChecksum
                | Self::InvalidBinary
                | Self::ChecksumMismatch
                | Self::FailedToLaunch
                | Self::FailedToStop
                | Self::StoppedUnexpectedly
        )
    }

    /// Returns `true` when the transition `self -> next` is legal.
    ///
    /// Failure states only re-enter [`PluginState::Unknown`]. `Running` is
    /// entered only from `Launching`; `Launching` only from `Available` or
    /// `Stopped`. Any non-failure state may fall into a failure state, and
    /// the loading states progress forward in declaration order.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        if self.is_failure() {
            return next == Self::Unknown;
        }
        if next.is_failure() {
            return true;
        }
        match next {
            Self::Unknown => true,
            Self::Running => self == Self::Launching,
            Self::Launching => matches!(self, Self::Available | Self::Stopped),
            Self::Stopped => matches!(self, Self::Running | Self::Launching),
            _ => Self::loading_rank(self)
                .zip(Self::loading_rank(next))
                .is_some_and(|(from, to)| to > from),
        }
    }

    /// Position of a state in the loading progression, if it is one.
    const fn loading_rank(state: Self) -> Option<u8> {
        match state {
            Self::Unknown => Some(0),
            Self::DirectoryDiscovered => Some(1),
            Self::DirectoryScanned => Some(2),
            Self::DirectoryValidated => Some(3),
            Self::DataLoaded => Some(4),
            Self::ManifestValidated => Some(5),
            Self::Available => Some(6),
            _ => None,
        }
    }
}

/// Error returned when an illegal state transition is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal plugin state transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State the plugin was in.
    pub from: PluginState,
    /// State that was requested.
    pub to: PluginState,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::PluginState::*;
    use super::*;

    #[rstest]
    #[case::discovery(Unknown, DirectoryDiscovered)]
    #[case::scan(DirectoryDiscovered, DirectoryScanned)]
    #[case::skip_ahead(DirectoryScanned, Available)]
    #[case::launch(Available, Launching)]
    #[case::run(Launching, Running)]
    #[case::stop(Running, Stopped)]
    #[case::relaunch(Stopped, Launching)]
    #[case::fail_any(DataLoaded, InvalidManifest)]
    #[case::crash(Running, StoppedUnexpectedly)]
    #[case::reset(FailedToLaunch, Unknown)]
    fn legal_transitions(#[case] from: PluginState, #[case] to: PluginState) {
        assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
    }

    #[rstest]
    #[case::run_from_available(Available, Running)]
    #[case::run_from_unknown(Unknown, Running)]
    #[case::backwards(Available, DirectoryScanned)]
    #[case::failure_to_running(FailedToLaunch, Running)]
    #[case::failure_to_failure(MissingManifest, InvalidManifest)]
    fn illegal_transitions(#[case] from: PluginState, #[case] to: PluginState) {
        assert!(!from.can_transition_to(to), "{from} -> {to} should be illegal");
    }

    #[test]
    fn failure_states_are_disjoint_from_lifecycle_states() {
        assert!(!Running.is_failure());
        assert!(!Stopped.is_failure());
        assert!(StoppedUnexpectedly.is_failure());
        assert!(ChecksumMismatch.is_failure());
    }

    #[test]
    fn display_uses_snake_case() {
        assert_eq!(StoppedUnexpectedly.to_string(), "stopped_unexpectedly");
        assert_eq!(DirectoryDiscovered.to_string(), "directory_discovered");
    }
}
