//! Working-copy provisioners.

use crate::ProcessRunner;
use async_trait::async_trait;
use cinder_core::{Build, BuildLogger, Error, Result, WorkingCopyProvisioner};
use std::path::Path;
use tracing::info;

async fn prepare_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn remove_tree(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            info!(path = %path.display(), "Removed working copy");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Copies a project that lives in a local directory.
#[derive(Debug, Clone, Default)]
pub struct LocalCopyProvisioner {
    runner: ProcessRunner,
}

impl LocalCopyProvisioner {
    pub fn new() -> Self {
        Self {
            runner: ProcessRunner::new().log_output(false),
        }
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl WorkingCopyProvisioner for LocalCopyProvisioner {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create_working_copy(
        &self,
        build: &Build,
        path: &Path,
        log: &BuildLogger,
    ) -> Result<bool> {
        let source = Path::new(&build.repository);
        if !source.is_dir() {
            log.failure(&format!(
                "Repository directory {} does not exist",
                source.display()
            ));
            return Ok(false);
        }

        prepare_parent(path).await?;
        tokio::fs::create_dir_all(path).await?;

        let from = source.join(".");
        let result = self
            .runner
            .run(
                "cp -R %s %s",
                &[from.to_string_lossy(), path.to_string_lossy()],
            )
            .await;
        if !result.success {
            log.failure(&format!("Failed to copy {}: {}", source.display(), result.stderr.trim()));
        }
        Ok(result.success)
    }

    async fn remove_working_copy(&self, path: &Path) -> Result<()> {
        remove_tree(path).await
    }
}

/// Clones a git repository and checks out the build's commit.
#[derive(Debug, Clone, Default)]
pub struct GitProvisioner {
    runner: ProcessRunner,
}

impl GitProvisioner {
    pub fn new() -> Self {
        Self {
            runner: ProcessRunner::new().log_output(false),
        }
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl WorkingCopyProvisioner for GitProvisioner {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn create_working_copy(
        &self,
        build: &Build,
        path: &Path,
        log: &BuildLogger,
    ) -> Result<bool> {
        prepare_parent(path).await?;
        let target = path.to_string_lossy().into_owned();

        let clone = self
            .runner
            .run(
                "git clone --quiet --branch %s -- %s %s",
                &[build.branch.as_str(), build.repository.as_str(), target.as_str()],
            )
            .await;
        if !clone.success {
            log.failure(&format!(
                "Failed to clone {} ({}): {}",
                build.repository,
                build.branch,
                clone.stderr.trim()
            ));
            return Ok(false);
        }

        if let Some(commit) = build.commit_id.as_deref().filter(|c| !c.is_empty()) {
            if commit.starts_with('-') {
                log.failure(&format!("Invalid commit id: {}", commit));
                return Ok(false);
            }
            let checkout = self
                .runner
                .run("git -C %s checkout --quiet %s", &[target.as_str(), commit])
                .await;
            if !checkout.success {
                log.failure(&format!(
                    "Failed to check out {}: {}",
                    commit,
                    checkout.stderr.trim()
                ));
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn remove_working_copy(&self, path: &Path) -> Result<()> {
        remove_tree(path).await
    }
}

/// Chooses a provisioner from the build's repository reference: existing
/// local directories are copied, anything else is cloned with git.
#[derive(Debug, Clone, Default)]
pub struct RepositoryProvisioner {
    local: LocalCopyProvisioner,
    git: GitProvisioner,
}

impl RepositoryProvisioner {
    pub fn new() -> Self {
        Self {
            local: LocalCopyProvisioner::new(),
            git: GitProvisioner::new(),
        }
    }

    pub fn with_runner(runner: ProcessRunner) -> Self {
        Self {
            local: LocalCopyProvisioner::new().with_runner(runner.clone()),
            git: GitProvisioner::new().with_runner(runner),
        }
    }

    fn select(&self, build: &Build) -> &dyn WorkingCopyProvisioner {
        let is_local = Path::new(&build.repository).is_dir()
            && !Path::new(&build.repository).join(".git").exists();
        if is_local {
            &self.local
        } else {
            &self.git
        }
    }
}

#[async_trait]
impl WorkingCopyProvisioner for RepositoryProvisioner {
    fn name(&self) -> &'static str {
        "repository"
    }

    async fn create_working_copy(
        &self,
        build: &Build,
        path: &Path,
        log: &BuildLogger,
    ) -> Result<bool> {
        let provisioner = self.select(build);
        log.info(&format!("Using {} working copy", provisioner.name()));
        provisioner.create_working_copy(build, path, log).await
    }

    async fn remove_working_copy(&self, path: &Path) -> Result<()> {
        remove_tree(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{BuildId, ProjectId};

    fn build_for(repository: &Path) -> Build {
        Build::new(
            BuildId::new(1),
            ProjectId::new(1),
            repository.to_string_lossy(),
            "main",
        )
    }

    #[tokio::test]
    async fn test_local_copy_and_remove() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir(source.path().join("src")).unwrap();
        std::fs::write(source.path().join("src/lib.txt"), "hello").unwrap();

        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("build").join("1");
        let build = build_for(source.path());
        let log = BuildLogger::new(build.id);

        let provisioner = LocalCopyProvisioner::new();
        assert!(provisioner.create_working_copy(&build, &target, &log).await.unwrap());
        assert_eq!(
            std::fs::read_to_string(target.join("src/lib.txt")).unwrap(),
            "hello"
        );

        provisioner.remove_working_copy(&target).await.unwrap();
        assert!(!target.exists());
        // Removing twice is fine.
        provisioner.remove_working_copy(&target).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_copy_missing_source() {
        let root = tempfile::tempdir().unwrap();
        let build = build_for(&root.path().join("nope"));
        let log = BuildLogger::new(build.id);

        let created = LocalCopyProvisioner::new()
            .create_working_copy(&build, &root.path().join("1"), &log)
            .await
            .unwrap();
        assert!(!created);
        assert!(log.contents().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_git_clone_failure_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let build = build_for(&root.path().join("missing.git"));
        let log = BuildLogger::new(build.id);

        let created = GitProvisioner::new()
            .create_working_copy(&build, &root.path().join("1"), &log)
            .await
            .unwrap();
        assert!(!created);
        assert!(log.contents().contains("Failed to clone"));
    }

    #[tokio::test]
    async fn test_repository_provisioner_copies_plain_directories() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("cinder.kdl"), "test {}").unwrap();
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("7");
        let build = build_for(source.path());
        let log = BuildLogger::new(build.id);

        let provisioner = RepositoryProvisioner::new();
        assert!(provisioner.create_working_copy(&build, &target, &log).await.unwrap());
        assert!(target.join("cinder.kdl").exists());
    }

    #[tokio::test]
    async fn test_git_repository_is_never_an_option() {
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("marker");
        let mut build = build_for(root.path());
        build.repository = format!("--upload-pack=touch {}", marker.display());
        let log = BuildLogger::new(build.id);

        let provisioner = GitProvisioner::new();
        let created = provisioner
            .create_working_copy(&build, &root.path().join("1"), &log)
            .await
            .unwrap();
        assert!(!created);
        assert!(!marker.exists());
    }
}
