//! Host bootstrap: configuration, registry scan, and requested launches.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use menagerie_config::Config;
use menagerie_executor::pool::Pool;
use menagerie_plugins::capability::CapabilityEvaluator;
use menagerie_plugins::registry::{LoaderError, PluginLoader};
use menagerie_plugins::supervisor::{PluginSupervisor, launch_from_catalog};
use menagerie_plugins::watcher::PluginDirWatcher;

/// Tracing target for bootstrap operations.
const BOOTSTRAP_TARGET: &str = "menageried::bootstrap";

/// Normal termination.
pub const EXIT_OK: u8 = 0;
/// Fatal initialization failure (config, telemetry, plugins root).
pub const EXIT_INIT_FAILURE: u8 = 1;
/// Unrecoverable supervisor failure (a requested launch failed).
pub const EXIT_SUPERVISOR_FAILURE: u8 = 2;

/// Command-line options for the host binary.
#[derive(Debug, clap::Parser)]
#[command(name = "menageried", about = "Menagerie plugin host")]
pub struct Cli {
    /// Path to the configuration file; defaults to ./config.yaml when present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Plugin names to launch after the registry scan.
    #[arg(long = "launch")]
    pub launch: Vec<String>,
}

/// Runs the host to completion and reports the process exit code.
#[must_use]
pub fn run(cli: &Cli) -> u8 {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("menageried: {err}");
            return EXIT_INIT_FAILURE;
        }
    };

    if let Err(err) = crate::telemetry::initialise(&config) {
        eprintln!("menageried: {err}");
        return EXIT_INIT_FAILURE;
    }

    info!(
        target: BOOTSTRAP_TARGET,
        application = %config.application.name,
        plugins_root = %config.plugins_root().display(),
        "menageried starting"
    );

    let loader = PluginLoader::new(&config.plugins_root());
    let (entries, failures) = loader.load();
    for (package_dir, err) in &failures {
        warn!(
            target: BOOTSTRAP_TARGET,
            package_dir = %package_dir.display(),
            error = %err,
            "plugin package failed to load"
        );
    }
    if entries.is_empty() && root_failed(&failures) {
        error!(target: BOOTSTRAP_TARGET, "plugins root is unusable");
        return EXIT_INIT_FAILURE;
    }
    info!(
        target: BOOTSTRAP_TARGET,
        catalogued = entries.len(),
        failed = failures.len(),
        "registry scan complete"
    );

    let evaluator = CapabilityEvaluator::new();
    for entry in entries.values() {
        evaluator.register(
            entry.manifest().plugin.name.clone(),
            entry.manifest().capabilities.clone(),
        );
    }

    let catalog = loader.catalog();
    let _watcher = if config.file_watcher.enabled && config.file_watcher.watch_plugins {
        match PluginDirWatcher::new(Duration::from_millis(500), |event| {
            info!(
                target: BOOTSTRAP_TARGET,
                path = %event.path.display(),
                kind = ?event.kind,
                "plugin package changed; reload to pick it up"
            );
        }) {
            Ok(mut watcher) => {
                for (package_dir, err) in watcher.watch_packages(&catalog) {
                    warn!(
                        target: BOOTSTRAP_TARGET,
                        package_dir = %package_dir.display(),
                        error = %err,
                        "failed to watch plugin directory"
                    );
                }
                Some(watcher)
            }
            Err(err) => {
                warn!(
                    target: BOOTSTRAP_TARGET,
                    error = %err,
                    "filesystem watching disabled"
                );
                None
            }
        }
    } else {
        None
    };

    let mut pool: Pool<serde_json::Value> =
        Pool::new(config.pool.max_workers, config.pool.buffer);
    pool.run();

    let supervisor = PluginSupervisor::new(Duration::from_millis(
        config.supervisor.handshake_timeout_ms,
    ));

    let mut launch_failures = 0usize;
    for name in &cli.launch {
        let Some(entry) = catalog.get_by_name(name) else {
            error!(target: BOOTSTRAP_TARGET, plugin = %name, "requested plugin is not catalogued");
            launch_failures += 1;
            continue;
        };
        match launch_from_catalog(&supervisor, &catalog, entry.package_dir()) {
            Ok(client) => {
                let guard = client.lock().unwrap_or_else(|poison| poison.into_inner());
                info!(
                    target: BOOTSTRAP_TARGET,
                    plugin = %name,
                    transport = %guard.transport(),
                    "plugin launched"
                );
            }
            Err(err) => {
                error!(
                    target: BOOTSTRAP_TARGET,
                    plugin = %name,
                    error = %err,
                    "plugin failed to launch"
                );
                launch_failures += 1;
            }
        }
    }

    supervisor.cleanup_all();
    pool.shutdown();
    let metrics = pool.metrics();
    info!(
        target: BOOTSTRAP_TARGET,
        submissions = metrics.submissions,
        successes = metrics.successes,
        failures = metrics.failures,
        "menageried stopping"
    );

    if launch_failures > 0 {
        EXIT_SUPERVISOR_FAILURE
    } else {
        EXIT_OK
    }
}

fn root_failed(failures: &menagerie_plugins::registry::LoaderErrors) -> bool {
    failures
        .values()
        .any(|err| matches!(err, LoaderError::InvalidRoot { .. } | LoaderError::Scan { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_parses_config_and_launches() {
        let cli = Cli::parse_from([
            "menageried",
            "--config",
            "/etc/menagerie/config.yaml",
            "--launch",
            "cat",
            "--launch",
            "dog",
        ]);
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/etc/menagerie/config.yaml"))
        );
        assert_eq!(cli.launch, vec!["cat", "dog"]);
    }

    #[test]
    fn missing_config_file_is_an_init_failure() {
        let cli = Cli {
            config: Some(PathBuf::from("/no/such/config.yaml")),
            launch: Vec::new(),
        };
        assert_eq!(run(&cli), EXIT_INIT_FAILURE);
    }

    #[test]
    fn missing_plugins_root_is_an_init_failure() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            format!("plugins_root: {}\n", dir.path().join("absent").display()),
        )
        .expect("write config");

        let cli = Cli {
            config: Some(config_path),
            launch: Vec::new(),
        };
        assert_eq!(run(&cli), EXIT_INIT_FAILURE);
    }

    #[test]
    fn unlaunchable_plugin_is_a_supervisor_failure() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let plugins = dir.path().join("plugins");
        std::fs::create_dir(&plugins).expect("create plugins root");
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            format!("plugins_root: {}\n", plugins.display()),
        )
        .expect("write config");

        let cli = Cli {
            config: Some(config_path),
            launch: vec![String::from("ghost")],
        };
        assert_eq!(run(&cli), EXIT_SUPERVISOR_FAILURE);
    }
}
