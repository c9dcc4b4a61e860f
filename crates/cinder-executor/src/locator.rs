//! Binary lookup for build tools.
//!
//! Project-pinned tools shadow installation-wide ones, which shadow the
//! system `PATH`.

use crate::ProcessRunner;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default binary directory of dependency managers that follow the
/// composer convention.
const DEFAULT_MANIFEST_BIN_DIR: &str = "vendor/bin";

#[derive(Debug, Clone)]
pub struct BinaryLocator {
    /// Directories relative to the search root, searched first.
    local_paths: Vec<PathBuf>,
    /// The installation's own binary directory.
    root_bin_dir: PathBuf,
    /// Manifest file that may declare `config.bin-dir`.
    manifest_name: String,
    runner: ProcessRunner,
}

impl BinaryLocator {
    pub fn new(
        local_paths: Vec<PathBuf>,
        root_bin_dir: impl Into<PathBuf>,
        manifest_name: impl Into<String>,
    ) -> Self {
        Self {
            local_paths,
            root_bin_dir: root_bin_dir.into(),
            manifest_name: manifest_name.into(),
            runner: ProcessRunner::new().log_output(false),
        }
    }

    /// Runner used for the system lookup.
    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Resolve the first of `names` that exists. Each name is tried in
    /// every location before the next name is considered.
    pub async fn find<S: AsRef<str>>(&self, names: &[S], search_root: Option<&Path>) -> Option<PathBuf> {
        let listed: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        debug!(binaries = %listed.join(", "), "Looking for binary");

        for name in &listed {
            if let Some(path) = self.find_one(name, search_root).await {
                debug!(path = %path.display(), "Found binary");
                return Some(path);
            }
        }

        warn!(binaries = %listed.join(", "), "Binary not found");
        None
    }

    async fn find_one(&self, name: &str, search_root: Option<&Path>) -> Option<PathBuf> {
        if let Some(root) = search_root {
            for dir in &self.local_paths {
                let candidate = root.join(dir).join(name);
                if is_executable(&candidate) {
                    return Some(candidate);
                }
            }

            if let Some(dir) = self.manifest_bin_dir(root) {
                let candidate = dir.join(name);
                if is_executable(&candidate) {
                    return Some(candidate);
                }
            }
        }

        let candidate = self.root_bin_dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }

        self.system_lookup(name).await
    }

    /// Binary directory declared by the manifest in `root`, or the
    /// conventional one when the manifest exists but declares none.
    fn manifest_bin_dir(&self, root: &Path) -> Option<PathBuf> {
        let content = std::fs::read_to_string(root.join(&self.manifest_name)).ok()?;
        let manifest: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                debug!(manifest = %self.manifest_name, error = %e, "Unreadable manifest");
                return None;
            }
        };

        if let Some(dir) = manifest
            .get("config")
            .and_then(|c| c.get("bin-dir"))
            .and_then(|d| d.as_str())
        {
            return Some(root.join(dir));
        }

        let default = root.join(DEFAULT_MANIFEST_BIN_DIR);
        default.is_dir().then_some(default)
    }

    async fn system_lookup(&self, name: &str) -> Option<PathBuf> {
        let finder = if cfg!(windows) { "where" } else { "which" };
        let result = self.runner.run(&format!("{} %s", finder), &[name]).await;
        if !result.success {
            return None;
        }
        result
            .stdout
            .first()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_tool(dir: &Path, name: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\necho tool\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn locator(root_bin: &Path) -> BinaryLocator {
        BinaryLocator::new(vec![PathBuf::from("tools")], root_bin, "composer.json")
    }

    #[tokio::test]
    async fn test_build_local_path_wins() {
        let install = tempfile::tempdir().unwrap();
        let build = tempfile::tempdir().unwrap();
        write_tool(install.path(), "cinder-test-tool");
        let local = write_tool(&build.path().join("tools"), "cinder-test-tool");

        let found = locator(install.path())
            .find(&["cinder-test-tool"], Some(build.path()))
            .await;
        assert_eq!(found, Some(local));
    }

    #[tokio::test]
    async fn test_manifest_bin_dir() {
        let install = tempfile::tempdir().unwrap();
        let build = tempfile::tempdir().unwrap();
        fs::write(
            build.path().join("composer.json"),
            r#"{"config": {"bin-dir": "bin"}}"#,
        )
        .unwrap();
        let tool = write_tool(&build.path().join("bin"), "cinder-test-tool");

        let found = locator(install.path())
            .find(&["cinder-test-tool"], Some(build.path()))
            .await;
        assert_eq!(found, Some(tool));
    }

    #[tokio::test]
    async fn test_manifest_default_bin_dir() {
        let install = tempfile::tempdir().unwrap();
        let build = tempfile::tempdir().unwrap();
        fs::write(build.path().join("composer.json"), "{}").unwrap();
        let tool = write_tool(&build.path().join("vendor/bin"), "cinder-test-tool");

        let found = BinaryLocator::new(vec![], install.path(), "composer.json")
            .find(&["cinder-test-tool"], Some(build.path()))
            .await;
        assert_eq!(found, Some(tool));
    }

    #[tokio::test]
    async fn test_candidates_tried_in_order() {
        let install = tempfile::tempdir().unwrap();
        let second = write_tool(install.path(), "cinder-second");

        let found = locator(install.path())
            .find(&["cinder-missing-first", "cinder-second"], None)
            .await;
        assert_eq!(found, Some(second));
    }

    #[tokio::test]
    async fn test_no_search_root_falls_through_to_system() {
        let install = tempfile::tempdir().unwrap();
        let found = locator(install.path()).find(&["sh"], None).await;
        let path = found.expect("sh should be on PATH");
        assert!(path.is_absolute());
        assert!(path.ends_with("sh"));
    }

    #[tokio::test]
    async fn test_not_found() {
        let install = tempfile::tempdir().unwrap();
        let build = tempfile::tempdir().unwrap();
        let found = locator(install.path())
            .find(&["cinder-definitely-not-installed"], Some(build.path()))
            .await;
        assert_eq!(found, None);
    }
}
