//! The menagerie host binary's library surface.
//!
//! `menageried` wires the pieces together: it loads configuration,
//! installs telemetry, scans the plugins root, registers capabilities,
//! optionally watches package directories, and launches requested plugins.
//! The binary's exit codes are part of its contract: `0` for normal
//! termination, `1` for fatal initialization failure, `2` for an
//! unrecoverable supervisor failure.

pub mod bootstrap;
pub mod telemetry;
