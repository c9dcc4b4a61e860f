//! Build pipeline - drives one build through its stages.
//!
//! Stage order is fixed: `setup`, `test`, `complete`, then exactly one of
//! `success` or `failure`. Whatever happens, the run ends with a status
//! notification, a finish time, removal of the working copy and a final
//! save.

use chrono::Utc;
use cinder_config::{PipelineConfig, Stage, parse_pipeline_config};
use cinder_core::{Build, BuildLogger, BuildStatus, NoopNotifier, StatusNotifier, WorkingCopyProvisioner};
use cinder_db::BuildRepo;
use cinder_executor::BinaryLocator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{BuildContext, PipelineError, PluginRegistry};

/// Result of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    /// Logical AND of every plugin result in the stage.
    pub success: bool,
    pub plugins: usize,
}

/// Result of a pipeline run that was not aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub stages: Vec<StageReport>,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

/// Executes builds.
pub struct Pipeline {
    repo: Arc<dyn BuildRepo>,
    provisioner: Arc<dyn WorkingCopyProvisioner>,
    notifier: Arc<dyn StatusNotifier>,
    registry: Arc<PluginRegistry>,
    locator: BinaryLocator,
    build_root: PathBuf,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        repo: Arc<dyn BuildRepo>,
        provisioner: Arc<dyn WorkingCopyProvisioner>,
        registry: Arc<PluginRegistry>,
        locator: BinaryLocator,
        build_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repo,
            provisioner,
            notifier: Arc::new(NoopNotifier),
            registry,
            locator,
            build_root: build_root.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StatusNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Token that interrupts running commands when cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn repo(&self) -> &Arc<dyn BuildRepo> {
        &self.repo
    }

    /// Working copy location of a build.
    pub fn build_path(&self, build: &Build) -> PathBuf {
        self.build_root.join(build.id.to_string())
    }

    /// Remove a build's working copy, wherever it was created.
    pub async fn remove_working_copy(&self, build: &Build) -> cinder_core::Result<()> {
        let path = build
            .working_dir
            .clone()
            .unwrap_or_else(|| self.build_path(build));
        self.provisioner.remove_working_copy(&path).await
    }

    /// Run `build` to completion.
    ///
    /// On `Err` the run was aborted; the build has nevertheless been moved
    /// to FAILED, cleaned up and saved where possible. After shutdown has
    /// been requested the build is not started and stays NEW.
    pub async fn execute(&self, build: &mut Build) -> Result<BuildOutcome, PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if build.start(Utc::now()).is_err() {
            return Err(PipelineError::NotStartable {
                id: build.id,
                status: build.status,
            });
        }

        let path = self.build_path(build);
        build.working_dir = Some(path.clone());
        info!(build_id = %build.id, project_id = %build.project_id, "Running build");

        let logger = Arc::new(BuildLogger::new(build.id));
        let result = self.run(build, &logger, &path).await;
        self.finalize(build, &logger, &path, result).await
    }

    async fn run(
        &self,
        build: &mut Build,
        logger: &Arc<BuildLogger>,
        path: &Path,
    ) -> Result<BuildOutcome, PipelineError> {
        self.repo.save(build).await?;
        self.notifier.send_status(build).await;

        let mut ctx = BuildContext::new(
            build,
            path,
            logger.clone(),
            self.locator.clone(),
            self.cancel.clone(),
        );

        if !self
            .provisioner
            .create_working_copy(build, path, logger)
            .await?
        {
            return Err(PipelineError::WorkingCopy);
        }

        let config = self.load_config(build, path)?;
        ctx.apply_config(&config);
        logger.notice(&format!("Working copy created: {}", path.display()));

        let mut stages = Vec::new();
        let mut success = true;
        for stage in [Stage::Setup, Stage::Test] {
            let report = self.run_stage(stage, &config, &ctx).await?;
            success &= report.success;
            stages.push(report);
            self.checkpoint(build, logger).await?;
        }

        let status = if success {
            BuildStatus::Success
        } else {
            BuildStatus::Failed
        };
        ctx.set_outcome(status);

        stages.push(self.run_stage(Stage::Complete, &config, &ctx).await?);

        let (final_stage, message) = if success {
            (Stage::Success, "BUILD SUCCESS")
        } else {
            (Stage::Failure, "BUILD FAILED")
        };
        stages.push(self.run_stage(final_stage, &config, &ctx).await?);
        logger.notice(message);

        Ok(BuildOutcome { status, stages })
    }

    fn load_config(&self, build: &Build, path: &Path) -> Result<PipelineConfig, PipelineError> {
        if let Some(text) = build.config.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(parse_pipeline_config(text)?);
        }
        PipelineConfig::from_working_copy(path)?.ok_or(PipelineError::MissingConfig)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        config: &PipelineConfig,
        ctx: &BuildContext,
    ) -> Result<StageReport, PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let plugins = config.plugins(stage);
        let mut success = true;
        if !plugins.is_empty() {
            ctx.logger().notice(&format!("RUNNING {} STAGE", stage.as_str().to_uppercase()));
        }

        for spec in plugins {
            ctx.logger().notice(&format!("RUNNING PLUGIN: {}", spec.name));

            let plugin_error = |source| PipelineError::Plugin {
                stage,
                plugin: spec.name.clone(),
                source,
            };
            let plugin = self.registry.create(spec).map_err(plugin_error)?;
            let ok = plugin.execute(ctx).await.map_err(plugin_error)?;

            info!(
                build_id = %ctx.build_id(),
                stage = %stage,
                plugin = %spec.name,
                success = ok,
                "Plugin finished"
            );
            ctx.logger().notice(if ok {
                "PLUGIN: SUCCESS"
            } else {
                "PLUGIN: FAILED"
            });
            success &= ok;
        }

        Ok(StageReport {
            stage,
            success,
            plugins: plugins.len(),
        })
    }

    /// Move buffered log lines into the build and save it.
    async fn checkpoint(&self, build: &mut Build, logger: &BuildLogger) -> Result<(), PipelineError> {
        build.append_log(&logger.drain());
        self.repo.save(build).await?;
        Ok(())
    }

    async fn finalize(
        &self,
        build: &mut Build,
        logger: &BuildLogger,
        path: &Path,
        result: Result<BuildOutcome, PipelineError>,
    ) -> Result<BuildOutcome, PipelineError> {
        let now = Utc::now();
        match &result {
            Ok(outcome) => {
                if let Err(e) = build.finish(outcome.status, now) {
                    warn!(build_id = %build.id, error = %e, "Unexpected build status");
                    build.force_failed(now);
                }
            }
            Err(e) => {
                error!(build_id = %build.id, error = %e, "Build aborted");
                logger.failure("BUILD FAILED: the run was aborted");
                build.force_failed(now);
            }
        }

        self.notifier.send_status(build).await;

        logger.notice("Removing build directory");
        if let Err(e) = self.provisioner.remove_working_copy(path).await {
            warn!(build_id = %build.id, error = %e, "Failed to remove working copy");
        }

        build.append_log(&logger.drain());
        let saved = self.repo.save(build).await;
        info!(build_id = %build.id, status = %build.status, "Build finished");

        let outcome = result?;
        saved?;
        Ok(outcome)
    }
}
