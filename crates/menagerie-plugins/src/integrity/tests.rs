//! Unit tests for checksum sidecar parsing and verification.

use rstest::rstest;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use super::*;
use crate::error::IntegrityError;

fn write_sidecar(dir: &TempDir, name: &str, contents: &str) {
    std::fs::write(dir.path().join(name), contents).expect("write sidecar");
}

#[test]
fn loads_digest_and_ignores_trailing_fields() {
    let dir = TempDir::new().expect("temp dir");
    let digest = "ab".repeat(32);
    write_sidecar(&dir, "cat.sha256", &format!("{digest}  cat\n"));

    let descriptor =
        ChecksumDescriptor::load(dir.path(), "cat.sha256").expect("should load");
    assert_eq!(descriptor.expected_hex(), digest);
}

#[test]
fn missing_sidecar_is_checksum_missing() {
    let dir = TempDir::new().expect("temp dir");
    let err = ChecksumDescriptor::load(dir.path(), "absent.sha256").expect_err("should fail");
    assert!(matches!(err, IntegrityError::ChecksumMissing { .. }));
}

#[rstest]
#[case::empty("")]
#[case::whitespace_only("   \n")]
#[case::not_hex("zzzz not-hex\n")]
#[case::short_digest("abcd1234\n")]
#[case::long_digest(&"ab".repeat(40))]
fn malformed_sidecar_is_rejected(#[case] contents: &str) {
    let dir = TempDir::new().expect("temp dir");
    write_sidecar(&dir, "cat.sha256", contents);
    let err = ChecksumDescriptor::load(dir.path(), "cat.sha256").expect_err("should fail");
    assert!(matches!(err, IntegrityError::ChecksumMalformed { .. }));
}

#[test]
fn verify_accepts_a_matching_binary() {
    let dir = TempDir::new().expect("temp dir");
    let binary = dir.path().join("cat");
    std::fs::write(&binary, b"#!/bin/sh\nexit 0\n").expect("write binary");
    let digest: [u8; 32] = Sha256::digest(b"#!/bin/sh\nexit 0\n").into();

    let descriptor = ChecksumDescriptor::new(digest);
    descriptor.verify_file(&binary).expect("should verify");
}

#[test]
fn verify_rejects_a_tampered_binary() {
    let dir = TempDir::new().expect("temp dir");
    let binary = dir.path().join("cat");
    std::fs::write(&binary, b"tampered contents").expect("write binary");

    let descriptor = ChecksumDescriptor::new([0u8; 32]);
    let err = descriptor.verify_file(&binary).expect_err("should fail");
    match err {
        IntegrityError::ChecksumMismatch { expected, actual, .. } => {
            assert_eq!(expected, "00".repeat(32));
            assert_ne!(expected, actual);
        }
        other => panic!("expected ChecksumMismatch, got {other:?}"),
    }
}

#[test]
fn sidecar_name_follows_the_entrypoint() {
    assert_eq!(sidecar_file_name("dog-stream"), "dog-stream.sha256");
}
