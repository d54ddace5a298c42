//! Precedence tests: defaults, then the file, then environment overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rstest::rstest;
use tempfile::TempDir;

use menagerie_config::{
    Config, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_MAX_WORKERS, LogFormat,
    settings::{ENV_LOG_FORMAT, ENV_PLUGINS_ROOT, ENV_POOL_MAX_WORKERS},
};

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, body).expect("write config file");
    path
}

fn no_env(_name: &str) -> Option<String> {
    None
}

#[test]
fn defaults_apply_without_a_file() {
    let config = Config::load_with_env(None, no_env).expect("load defaults");
    assert_eq!(config.pool.max_workers, DEFAULT_MAX_WORKERS);
    assert_eq!(config.pool.buffer, 0);
    assert_eq!(
        config.supervisor.handshake_timeout_ms,
        DEFAULT_HANDSHAKE_TIMEOUT_MS
    );
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.plugins_root(), Path::new("plugins"));
}

#[test]
fn file_values_override_defaults() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(
        &dir,
        "plugins_root: /srv/plugins\npool:\n  max_workers: 12\n  buffer: 64\nsupervisor:\n  handshake_timeout_ms: 250\n",
    );

    let config = Config::load_with_env(Some(path.as_path()), no_env).expect("load file");
    assert_eq!(config.plugins_root(), Path::new("/srv/plugins"));
    assert_eq!(config.pool.max_workers, 12);
    assert_eq!(config.pool.buffer, 64);
    assert_eq!(config.supervisor.handshake_timeout_ms, 250);
}

#[test]
fn environment_overrides_file_values() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "plugins_root: /srv/plugins\npool:\n  max_workers: 12\n");

    let env: HashMap<&str, &str> = HashMap::from([
        (ENV_PLUGINS_ROOT, "/opt/plugins"),
        (ENV_POOL_MAX_WORKERS, "3"),
        (ENV_LOG_FORMAT, "compact"),
    ]);
    let config = Config::load_with_env(Some(path.as_path()), |name| {
        env.get(name).map(ToString::to_string)
    })
    .expect("load with overrides");

    assert_eq!(config.plugins_root(), Path::new("/opt/plugins"));
    assert_eq!(config.pool.max_workers, 3);
    assert_eq!(config.logging.format, LogFormat::Compact);
}

#[rstest]
#[case::json("json", LogFormat::Json)]
#[case::compact("compact", LogFormat::Compact)]
#[case::case_insensitive("COMPACT", LogFormat::Compact)]
fn log_format_override_parses(#[case] raw: &str, #[case] expected: LogFormat) {
    let config = Config::load_with_env(None, |name| {
        (name == ENV_LOG_FORMAT).then(|| raw.to_string())
    })
    .expect("load with format override");
    assert_eq!(config.logging.format, expected);
}

#[test]
fn unknown_top_level_keys_are_ignored() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "pool:\n  max_workers: 2\nfuture_section:\n  key: value\n");
    let config = Config::load_with_env(Some(path.as_path()), no_env).expect("load file");
    assert_eq!(config.pool.max_workers, 2);
}
