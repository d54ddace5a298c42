//! Unit tests for package discovery, the catalog, and failure accounting.

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use super::*;
use crate::state::PluginState;

fn manifest_body(name: &str, format: &str) -> String {
    format!(
        "plugin:\n  name: {name}\n  type: animal\n  format: {format}\n  entrypoint: {name}\nhandshake:\n  protocol_version: 1\n  magic_cookie_key: ANIMAL_PLUGIN\n  magic_cookie_value: hello\n"
    )
}

fn write_package(root: &Path, name: &str, format: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("create package dir");
    std::fs::write(dir.join("manifest.yaml"), manifest_body(name, format))
        .expect("write manifest");
    write_entrypoint(&dir, name);
    dir
}

fn write_entrypoint(dir: &Path, name: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\necho {name}\n")).expect("write entrypoint");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod entrypoint");
    }
}

fn write_sidecar(dir: &Path, name: &str) {
    let contents = std::fs::read(dir.join(name)).expect("read entrypoint");
    let digest = hex::encode(Sha256::digest(&contents));
    std::fs::write(dir.join(format!("{name}.sha256")), format!("{digest}  {name}\n"))
        .expect("write sidecar");
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().expect("canonicalize")
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[test]
fn good_and_broken_packages_are_both_observable() {
    let root = TempDir::new().expect("temp dir");
    let good = write_package(root.path(), "good", "framed-rpc");

    let broken = root.path().join("broken");
    std::fs::create_dir(&broken).expect("create broken dir");
    std::fs::write(broken.join("manifest.yaml"), "plugin: [malformed\n").expect("write yaml");

    let loader = PluginLoader::new(root.path());
    let (entries, failures) = loader.load();

    assert_eq!(entries.len(), 1);
    assert!(entries.contains_key(&canonical(&good)));

    assert_eq!(failures.len(), 1);
    let failure = failures.get(&canonical(&broken)).expect("broken recorded");
    assert!(matches!(
        failure,
        LoaderError::Manifest(ManifestError::Parse { .. })
    ));
}

#[test]
fn missing_root_is_a_single_root_keyed_error() {
    let root = TempDir::new().expect("temp dir");
    let absent = root.path().join("no-such-dir");

    let loader = PluginLoader::new(&absent);
    let (entries, failures) = loader.load();

    assert!(entries.is_empty());
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures.get(&absent),
        Some(LoaderError::InvalidRoot { .. })
    ));
}

#[test]
fn non_directory_children_are_skipped() {
    let root = TempDir::new().expect("temp dir");
    write_package(root.path(), "good", "framed-rpc");
    std::fs::write(root.path().join("stray-file.txt"), "not a package").expect("write stray");

    let loader = PluginLoader::new(root.path());
    let (entries, failures) = loader.load();
    assert_eq!(entries.len(), 1);
    assert!(failures.is_empty());
}

#[test]
fn two_loads_without_mutation_agree() {
    let root = TempDir::new().expect("temp dir");
    write_package(root.path(), "cat", "framed-rpc");
    write_package(root.path(), "dog", "stream-rpc");

    let loader = PluginLoader::new(root.path());
    let (first, _) = loader.load();
    let (second, _) = loader.reload();

    assert_eq!(
        first.keys().collect::<std::collections::BTreeSet<_>>(),
        second.keys().collect::<std::collections::BTreeSet<_>>(),
    );
    for (dir, entry) in &first {
        assert_eq!(entry.hash(), second[dir].hash(), "hash differs for {dir:?}");
    }
}

#[test]
fn reload_keeps_old_entries_valid() {
    let root = TempDir::new().expect("temp dir");
    let dir = write_package(root.path(), "cat", "framed-rpc");

    let loader = PluginLoader::new(root.path());
    let (first, _) = loader.load();
    let held = Arc::clone(first.get(&canonical(&dir)).expect("entry"));

    // Mutate the manifest and reload; the held snapshot must not change.
    std::fs::write(
        dir.join("manifest.yaml"),
        manifest_body("cat", "stream-rpc"),
    )
    .expect("rewrite manifest");
    let (second, _) = loader.reload();

    assert_eq!(held.manifest().plugin.format, "framed-rpc");
    assert_eq!(
        second[&canonical(&dir)].manifest().plugin.format,
        "stream-rpc"
    );
    assert_ne!(held.hash(), second[&canonical(&dir)].hash());
}

#[cfg(unix)]
#[test]
fn symlinked_escape_packages_are_rejected() {
    let outside = TempDir::new().expect("outside dir");
    write_package(outside.path(), "escapee", "framed-rpc");

    let root = TempDir::new().expect("plugins root");
    std::os::unix::fs::symlink(outside.path().join("escapee"), root.path().join("escapee"))
        .expect("symlink package");

    let loader = PluginLoader::new(root.path());
    let (entries, failures) = loader.load();

    assert!(entries.is_empty());
    assert_eq!(failures.len(), 1);
    let failure = failures.values().next().expect("one failure");
    assert!(matches!(failure, LoaderError::OutsideRoot { .. }));
}

// ---------------------------------------------------------------------------
// Checksum sidecars
// ---------------------------------------------------------------------------

#[test]
fn sidecar_is_attached_to_the_entry() {
    let root = TempDir::new().expect("temp dir");
    let dir = write_package(root.path(), "cat", "framed-rpc");
    write_sidecar(&dir, "cat");

    let loader = PluginLoader::new(root.path());
    let (entries, failures) = loader.load();
    assert!(failures.is_empty());

    let entry = entries.get(&canonical(&dir)).expect("entry");
    let checksum = entry.checksum().expect("checksum attached");
    checksum
        .verify_file(entry.entrypoint())
        .expect("entrypoint verifies");

    let descriptor = entry.launch_descriptor().expect("descriptor");
    assert!(descriptor.checksum.is_some());
    assert_eq!(descriptor.command, entry.entrypoint());
}

#[test]
fn malformed_sidecar_fails_the_package() {
    let root = TempDir::new().expect("temp dir");
    let dir = write_package(root.path(), "cat", "framed-rpc");
    std::fs::write(dir.join("cat.sha256"), "not-a-digest\n").expect("write sidecar");

    let loader = PluginLoader::new(root.path());
    let (entries, failures) = loader.load();

    assert!(entries.is_empty());
    assert!(matches!(
        failures.get(&canonical(&dir)),
        Some(LoaderError::Integrity(IntegrityError::ChecksumMalformed { .. }))
    ));
    assert_eq!(
        loader.catalog().state(&canonical(&dir)),
        PluginState::InvalidChecksum
    );
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[test]
fn loaded_packages_become_available() {
    let root = TempDir::new().expect("temp dir");
    let dir = write_package(root.path(), "cat", "framed-rpc");

    let loader = PluginLoader::new(root.path());
    let _ = loader.load();
    assert_eq!(
        loader.catalog().state(&canonical(&dir)),
        PluginState::Available
    );
}

#[test]
fn unknown_format_marks_invalid_launch_descriptor() {
    let root = TempDir::new().expect("temp dir");
    let dir = write_package(root.path(), "cat", "carrier-pigeon");

    let loader = PluginLoader::new(root.path());
    let (entries, failures) = loader.load();

    assert!(entries.is_empty());
    assert!(matches!(
        failures.get(&canonical(&dir)),
        Some(LoaderError::UnknownFormat { .. })
    ));
    assert_eq!(
        loader.catalog().state(&canonical(&dir)),
        PluginState::InvalidLaunchDescriptor
    );
}

#[test]
fn missing_manifest_marks_missing_manifest() {
    let root = TempDir::new().expect("temp dir");
    let dir = root.path().join("empty-package");
    std::fs::create_dir(&dir).expect("create dir");

    let loader = PluginLoader::new(root.path());
    let (_, failures) = loader.load();

    assert!(matches!(
        failures.get(&canonical(&dir)),
        Some(LoaderError::Manifest(ManifestError::NotFound { .. }))
    ));
    assert_eq!(
        loader.catalog().state(&canonical(&dir)),
        PluginState::MissingManifest
    );
}

#[test]
fn illegal_transitions_are_rejected_by_the_catalog() {
    let catalog = Catalog::new();
    let dir = Path::new("/plugins/cat");
    catalog
        .set_state(dir, PluginState::DirectoryDiscovered)
        .expect("legal");
    let err = catalog
        .set_state(dir, PluginState::Running)
        .expect_err("running requires launching");
    assert_eq!(err.from, PluginState::DirectoryDiscovered);
    assert_eq!(catalog.state(dir), PluginState::DirectoryDiscovered);
}

// ---------------------------------------------------------------------------
// Catalog lookups
// ---------------------------------------------------------------------------

#[test]
fn catalog_finds_entries_by_plugin_name() {
    let root = TempDir::new().expect("temp dir");
    write_package(root.path(), "cat", "framed-rpc");
    write_package(root.path(), "dog", "stream-rpc");

    let loader = PluginLoader::new(root.path());
    let _ = loader.load();
    let catalog = loader.catalog();

    assert_eq!(catalog.len(), 2);
    assert!(!catalog.is_empty());
    let dog = catalog.get_by_name("dog").expect("dog entry");
    assert_eq!(dog.manifest().plugin.name, "dog");
    assert!(catalog.get_by_name("ferret").is_none());
}

#[test]
fn snapshots_are_independent_of_later_updates() {
    let root = TempDir::new().expect("temp dir");
    write_package(root.path(), "cat", "framed-rpc");

    let loader = PluginLoader::new(root.path());
    let _ = loader.load();
    let snapshot = loader.catalog().snapshot();

    write_package(root.path(), "dog", "framed-rpc");
    let _ = loader.reload();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(loader.catalog().len(), 2);
}
