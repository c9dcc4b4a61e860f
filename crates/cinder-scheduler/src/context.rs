//! Per-run execution context handed to every plugin.

use cinder_config::{PipelineConfig, VariableContext};
use cinder_core::{Build, BuildId, BuildLogger, BuildStatus, ProjectId};
use cinder_executor::{BinaryLocator, ProcessRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a plugin may touch while one build runs.
///
/// Owned by a single pipeline run and never shared between builds.
#[derive(Debug)]
pub struct BuildContext {
    build_id: BuildId,
    project_id: ProjectId,
    build_path: PathBuf,
    ignore: Vec<String>,
    verbose: bool,
    /// Result of setup and test, known from the complete stage on.
    outcome: Option<BuildStatus>,
    runner: ProcessRunner,
    locator: BinaryLocator,
    variables: VariableContext,
    logger: Arc<BuildLogger>,
}

impl BuildContext {
    pub fn new(
        build: &Build,
        build_path: impl Into<PathBuf>,
        logger: Arc<BuildLogger>,
        locator: BinaryLocator,
        cancel: CancellationToken,
    ) -> Self {
        let build_path = build_path.into();
        let runner = ProcessRunner::new()
            .with_working_dir(&build_path)
            .with_sink(logger.clone())
            .with_cancellation(cancel.clone());
        let locator =
            locator.with_runner(ProcessRunner::new().log_output(false).with_cancellation(cancel));

        Self {
            build_id: build.id,
            project_id: build.project_id,
            variables: VariableContext::for_build(build, &build_path),
            build_path,
            ignore: Vec::new(),
            verbose: false,
            outcome: None,
            runner,
            locator,
            logger,
        }
    }

    /// Apply the build-local settings of a pipeline configuration.
    pub fn apply_config(&mut self, config: &PipelineConfig) {
        self.verbose = config.verbose;
        self.ignore = config.ignore.clone();
        self.logger.set_verbose(config.verbose);
        self.runner = self.runner.clone().verbose(config.verbose);
    }

    pub(crate) fn set_outcome(&mut self, status: BuildStatus) {
        self.outcome = Some(status);
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn build_path(&self) -> &Path {
        &self.build_path
    }

    pub fn ignore(&self) -> &[String] {
        &self.ignore
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// The status the build will finish with. `None` while setup and test
    /// are still running.
    pub fn outcome(&self) -> Option<BuildStatus> {
        self.outcome
    }

    /// Runner bound to the working copy and the build log.
    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn locator(&self) -> &BinaryLocator {
        &self.locator
    }

    pub fn logger(&self) -> &BuildLogger {
        &self.logger
    }

    pub fn variables(&self) -> &VariableContext {
        &self.variables
    }

    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) {
        self.variables.set(name, value);
    }

    pub fn interpolate(&self, input: &str) -> String {
        self.variables.interpolate(input)
    }

    pub fn is_cancelled(&self) -> bool {
        self.runner.cancellation_token().is_cancelled()
    }
}
