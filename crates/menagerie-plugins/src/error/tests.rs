//! Unit tests for error display formatting.

use std::path::PathBuf;
use std::sync::Arc;

use super::*;

#[test]
fn manifest_not_found_names_the_package() {
    let err = ManifestError::NotFound {
        package_dir: PathBuf::from("/plugins/cat"),
    };
    assert_eq!(err.to_string(), "no manifest found in package '/plugins/cat'");
}

#[test]
fn read_error_preserves_the_source() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err = ManifestError::Read {
        path: PathBuf::from("/plugins/cat/manifest.yaml"),
        source: Arc::new(io),
    };
    assert!(std::error::Error::source(&err).is_some());
    assert!(err.to_string().contains("denied"));
}

#[test]
fn checksum_mismatch_reports_both_digests() {
    let err = IntegrityError::ChecksumMismatch {
        path: PathBuf::from("/plugins/cat/cat"),
        expected: "00".repeat(32),
        actual: "ff".repeat(32),
    };
    let text = err.to_string();
    assert!(text.contains(&"00".repeat(32)));
    assert!(text.contains(&"ff".repeat(32)));
}

#[test]
fn errors_are_cloneable_for_loader_accumulation() {
    let err = ManifestError::InvalidMagicCookieKey;
    let copy = err.clone();
    assert_eq!(err.to_string(), copy.to_string());
}
