//! Build scheduler - selects pending builds and dispatches them.
//!
//! One call to [`Scheduler::run_once`] is one cycle: reclaim stuck builds,
//! work out how much capacity is left, pick eligible pending builds and run
//! them through the pipeline.

use chrono::{DateTime, Utc};
use cinder_core::{Build, BuildId, BuildStatus, ProjectId};
use cinder_db::BuildRepo;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{Pipeline, PipelineError, SchedulerError};

/// Scheduler limits.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Ceiling on builds RUNNING at once.
    pub max_builds: usize,
    /// A RUNNING build older than this is presumed dead.
    pub build_timeout: Duration,
    /// Run the builds selected in one cycle concurrently.
    pub parallel: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_builds: 100,
            build_timeout: Duration::from_secs(1800),
            parallel: false,
        }
    }
}

impl From<&cinder_config::system::SchedulerSettings> for SchedulerConfig {
    fn from(settings: &cinder_config::system::SchedulerSettings) -> Self {
        Self {
            max_builds: settings.max_builds,
            build_timeout: settings.build_timeout,
            parallel: settings.parallel,
        }
    }
}

/// Live RUNNING builds found at the start of a cycle.
#[derive(Debug, Default)]
pub struct RunningBuilds {
    pub count: usize,
    pub busy_projects: HashSet<ProjectId>,
    /// Builds forced to FAILED this cycle.
    pub reclaimed: Vec<BuildId>,
}

pub struct Scheduler {
    repo: Arc<dyn BuildRepo>,
    pipeline: Pipeline,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn BuildRepo>, pipeline: Pipeline, config: SchedulerConfig) -> Self {
        Self {
            repo,
            pipeline,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run one scheduling cycle, returning the number of builds dispatched.
    pub async fn run_once(&self, max_builds: usize) -> Result<usize, SchedulerError> {
        let running = self.validate_running_builds(Utc::now()).await?;
        if running.count >= max_builds {
            info!(
                running = running.count,
                max_builds, "No build capacity this cycle"
            );
            return Ok(0);
        }

        let builds = self
            .pending_builds(&running.busy_projects, max_builds - running.count)
            .await?;
        if builds.is_empty() {
            return Ok(0);
        }
        info!(count = builds.len(), "Dispatching builds");

        let finished = if self.config.parallel {
            if self.pipeline.is_cancelled() {
                Vec::new()
            } else {
                join_all(builds.into_iter().map(|build| self.run_build(build))).await
            }
        } else {
            let mut finished = Vec::with_capacity(builds.len());
            for build in builds {
                if self.pipeline.is_cancelled() {
                    break;
                }
                finished.push(self.run_build(build).await);
            }
            finished
        };

        // Builds cut off by shutdown are left NEW for the next run.
        let dispatched = finished
            .iter()
            .filter(|build| build.status != BuildStatus::New)
            .count();
        Ok(dispatched)
    }

    /// Fail RUNNING builds past the timeout and report the rest.
    ///
    /// A RUNNING build without a start time cannot be aged and is treated
    /// as stuck.
    pub async fn validate_running_builds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<RunningBuilds, SchedulerError> {
        let timeout = chrono::Duration::from_std(self.config.build_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let mut running = RunningBuilds::default();

        for mut build in self.repo.get_by_status(BuildStatus::Running).await? {
            let stuck = match build.started_at {
                Some(started) => now - started > timeout,
                None => true,
            };

            if !stuck {
                running.count += 1;
                running.busy_projects.insert(build.project_id);
                continue;
            }

            warn!(build_id = %build.id, project_id = %build.project_id, "Reclaiming stuck build");
            build.force_failed(now);
            build.append_log("\n\nBuild timed out and was marked as failed.");
            self.repo.save(&build).await?;
            if let Err(e) = self.pipeline.remove_working_copy(&build).await {
                warn!(build_id = %build.id, error = %e, "Failed to remove working copy");
            }
            running.reclaimed.push(build.id);
        }

        Ok(running)
    }

    /// NEW builds in creation order, at most `limit`, skipping busy
    /// projects. Each selected build marks its project busy.
    pub async fn pending_builds(
        &self,
        busy: &HashSet<ProjectId>,
        limit: usize,
    ) -> Result<Vec<Build>, SchedulerError> {
        let mut busy = busy.clone();
        let mut selected = Vec::new();
        if limit == 0 {
            return Ok(selected);
        }

        for build in self.repo.get_by_status(BuildStatus::New).await? {
            if !busy.insert(build.project_id) {
                continue;
            }
            selected.push(build);
            if selected.len() == limit {
                break;
            }
        }
        Ok(selected)
    }

    /// Run one build through the pipeline. Errors stay with the build: an
    /// aborted run ends FAILED with the error text in its log.
    pub async fn run_build(&self, mut build: Build) -> Build {
        match self.pipeline.execute(&mut build).await {
            Ok(outcome) => {
                info!(build_id = %build.id, status = %outcome.status, "Build complete");
            }
            Err(PipelineError::Cancelled) if build.status == BuildStatus::New => {
                info!(build_id = %build.id, "Shutting down, build left pending");
            }
            Err(e) => {
                error!(build_id = %build.id, error = %e, "Build aborted");
                build.append_log(&format!("\n\n{}", e));
                build.abort(Utc::now());
                if let Err(e) = self.repo.save(&build).await {
                    error!(build_id = %build.id, error = %e, "Failed to save aborted build");
                }
            }
        }
        build
    }

    /// Run a single NEW build by id.
    pub async fn run_build_by_id(&self, id: BuildId) -> Result<Build, SchedulerError> {
        let build = self.repo.get(id).await?;
        if build.status != BuildStatus::New {
            return Err(SchedulerError::NotPending {
                id,
                status: build.status,
            });
        }
        Ok(self.run_build(build).await)
    }

    /// Duplicate the most recent build and run the copy.
    pub async fn rebuild_latest(&self) -> Result<Option<Build>, SchedulerError> {
        let Some(latest) = self.repo.latest().await? else {
            return Ok(None);
        };
        let copy = self.repo.create_duplicate(&latest).await?;
        info!(build_id = %copy.id, source = %latest.id, "Rebuilding");
        Ok(Some(self.run_build(copy).await))
    }
}
