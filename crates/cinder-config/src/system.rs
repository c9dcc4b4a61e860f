//! System configuration parsing.
//!
//! ```kdl
//! home "/var/lib/cinder"
//! database-url "postgres://cinder@localhost/cinder"
//! build-root "build"
//! daemon {
//!     lock-file "daemon/daemon.pid"
//!     interval 15
//! }
//! scheduler {
//!     max-builds 10
//!     build-timeout 1800
//! }
//! binaries {
//!     local-path "vendor/bin" "bin"
//! }
//! notify {
//!     webhook "https://ci.example.com/hooks/status"
//! }
//! ```
//!
//! Relative paths are resolved against `home`.

use crate::pipeline::{get_all_string_args, get_first_string_arg};
use crate::{ConfigError, ConfigResult};
use cinder_core::BuildId;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Installation directory; base for relative paths.
    pub home: PathBuf,
    /// Connection string of the build store.
    pub database_url: Option<String>,
    /// Parent directory of per-build working copies.
    pub build_root: PathBuf,
    pub daemon: DaemonConfig,
    pub scheduler: SchedulerSettings,
    pub binaries: BinaryConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// PID lock file guarding the single daemon instance.
    pub lock_file: PathBuf,
    /// Output of a daemon started in the background.
    pub log_file: PathBuf,
    /// Pause between scheduler cycles.
    pub interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Ceiling on concurrently running builds.
    pub max_builds: usize,
    /// A build running longer than this is considered stuck.
    pub build_timeout: Duration,
    /// Dispatch the builds selected in one cycle concurrently.
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryConfig {
    /// Directories searched inside a working copy, in order.
    pub local_paths: Vec<PathBuf>,
    /// The installation's own binary directory.
    pub root_bin_dir: PathBuf,
    /// Dependency manifest that may declare a binary directory.
    pub manifest: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// URL receiving build status updates.
    pub webhook: Option<String>,
}

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_BUILDS: usize = 100;
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(1800);

impl SystemConfig {
    /// Defaults rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            database_url: None,
            build_root: home.join("build"),
            daemon: DaemonConfig {
                lock_file: home.join("daemon").join("daemon.pid"),
                log_file: home.join("daemon").join("daemon.log"),
                interval: DEFAULT_INTERVAL,
            },
            scheduler: SchedulerSettings {
                max_builds: DEFAULT_MAX_BUILDS,
                build_timeout: DEFAULT_BUILD_TIMEOUT,
                parallel: false,
            },
            binaries: BinaryConfig {
                local_paths: vec![PathBuf::from("vendor/bin")],
                root_bin_dir: home.join("vendor").join("bin"),
                manifest: "composer.json".to_string(),
            },
            notify: NotifyConfig::default(),
            home,
        }
    }

    /// Load configuration from a file. A missing file yields the defaults.
    pub fn load(path: &Path, home: &Path) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => parse_system_config(&content, home),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::with_home(home)),
            Err(e) => Err(e.into()),
        }
    }

    /// Working copy location of a build.
    pub fn build_path(&self, id: BuildId) -> PathBuf {
        self.build_root.join(id.to_string())
    }
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str, home: &Path) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let home = match doc.get("home") {
        Some(node) => {
            let value = required_string(node, "home")?;
            home.join(value)
        }
        None => home.to_path_buf(),
    };
    let mut config = SystemConfig::with_home(&home);

    for node in doc.nodes() {
        match node.name().value() {
            "database-url" => {
                config.database_url = Some(required_string(node, "database-url")?);
            }
            "build-root" => {
                config.build_root = home.join(required_string(node, "build-root")?);
            }
            "daemon" => parse_daemon(node, &home, &mut config.daemon)?,
            "scheduler" => parse_scheduler(node, &mut config.scheduler)?,
            "binaries" => parse_binaries(node, &home, &mut config.binaries)?,
            "notify" => {
                for child in children(node) {
                    if child.name().value() == "webhook" {
                        config.notify.webhook = Some(required_string(child, "notify.webhook")?);
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_daemon(node: &KdlNode, home: &Path, daemon: &mut DaemonConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "lock-file" => daemon.lock_file = home.join(required_string(child, "daemon.lock-file")?),
            "log-file" => daemon.log_file = home.join(required_string(child, "daemon.log-file")?),
            "interval" => {
                daemon.interval = Duration::from_secs(positive_integer(child, "daemon.interval")?)
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_scheduler(node: &KdlNode, scheduler: &mut SchedulerSettings) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "max-builds" => {
                let max = positive_integer(child, "scheduler.max-builds")?;
                scheduler.max_builds =
                    usize::try_from(max).map_err(|_| ConfigError::InvalidValue {
                        field: "scheduler.max-builds".to_string(),
                        message: format!("{} is too large", max),
                    })?;
            }
            "build-timeout" => {
                scheduler.build_timeout =
                    Duration::from_secs(positive_integer(child, "scheduler.build-timeout")?);
            }
            "parallel" => {
                scheduler.parallel = child
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .map(|e| e.value().as_bool())
                    .unwrap_or(Some(true))
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "scheduler.parallel".to_string(),
                        message: "expected #true or #false".to_string(),
                    })?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_binaries(node: &KdlNode, home: &Path, binaries: &mut BinaryConfig) -> ConfigResult<()> {
    let mut local_paths = Vec::new();
    for child in children(node) {
        match child.name().value() {
            "local-path" => {
                local_paths.extend(get_all_string_args(child).into_iter().map(PathBuf::from));
            }
            "root-bin-dir" => {
                binaries.root_bin_dir = home.join(required_string(child, "binaries.root-bin-dir")?);
            }
            "manifest" => {
                binaries.manifest = required_string(child, "binaries.manifest")?;
            }
            _ => {}
        }
    }
    if !local_paths.is_empty() {
        binaries.local_paths = local_paths;
    }
    Ok(())
}

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|c| c.nodes().iter())
}

fn required_string(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn positive_integer(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a positive integer, got {}", value),
        })
}
