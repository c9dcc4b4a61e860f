//! Build records and their lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{BuildId, Error, ProjectId, Result};

/// Lifecycle status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Submitted, waiting for the scheduler.
    New,
    /// Picked up by a pipeline run.
    Running,
    /// Every setup and test plugin succeeded.
    Success,
    /// A plugin failed, the run aborted, or the build timed out.
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::New => "new",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }

    /// Status only moves forward: NEW -> RUNNING -> {SUCCESS, FAILED}.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        matches!(
            (self, next),
            (BuildStatus::New, BuildStatus::Running)
                | (BuildStatus::Running, BuildStatus::Success)
                | (BuildStatus::Running, BuildStatus::Failed)
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(BuildStatus::New),
            "running" => Ok(BuildStatus::Running),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown build status: {}", other))),
        }
    }
}

/// One request to run the pipeline against a project revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub project_id: ProjectId,
    pub status: BuildStatus,
    /// Clone URL or local path of the project repository.
    pub repository: String,
    pub branch: String,
    /// Commit to check out; the branch head when absent.
    pub commit_id: Option<String>,
    /// Pipeline configuration stored with the project. Takes precedence
    /// over a `cinder.kdl` found in the working copy.
    pub config: Option<String>,
    /// Accumulated build log.
    pub log: String,
    /// Working copy used by the current or last run.
    pub working_dir: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Build {
    /// A fresh build in state NEW.
    pub fn new(
        id: BuildId,
        project_id: ProjectId,
        repository: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id,
            project_id,
            status: BuildStatus::New,
            repository: repository.into(),
            branch: branch.into(),
            commit_id: None,
            config: None,
            log: String::new(),
            working_dir: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: BuildStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Move to RUNNING and record the start time.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(BuildStatus::Running)?;
        self.started_at = Some(at);
        self.finished_at = None;
        Ok(())
    }

    /// Move to a terminal status and record the finish time.
    pub fn finish(&mut self, status: BuildStatus, at: DateTime<Utc>) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "{} is not a terminal status",
                status
            )));
        }
        self.transition(status)?;
        self.finished_at = Some(at);
        Ok(())
    }

    /// Force the build into FAILED regardless of where it got stuck.
    ///
    /// A build that never started is moved through RUNNING first so the
    /// recorded history stays monotonic. A build already in a terminal
    /// state keeps its status; only a missing finish time is filled in.
    pub fn force_failed(&mut self, at: DateTime<Utc>) {
        match self.status {
            BuildStatus::New => {
                self.status = BuildStatus::Failed;
                self.started_at.get_or_insert(at);
                self.finished_at = Some(at);
            }
            BuildStatus::Running => {
                self.status = BuildStatus::Failed;
                self.finished_at = Some(at);
            }
            BuildStatus::Success | BuildStatus::Failed => {
                self.finished_at.get_or_insert(at);
            }
        }
    }

    /// Record that the run was aborted. Unlike [`Build::force_failed`] this
    /// overrides a SUCCESS that was never persisted.
    pub fn abort(&mut self, at: DateTime<Utc>) {
        if self.status == BuildStatus::Success {
            self.status = BuildStatus::Failed;
        }
        self.force_failed(at);
    }

    /// Append text to the build log.
    pub fn append_log(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.log.push_str(text);
    }

    /// How long the build has been (or was) running.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.started_at?;
        Some(self.finished_at.unwrap_or(now) - started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_build() -> Build {
        Build::new(BuildId::new(1), ProjectId::new(1), "/srv/repo", "main")
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            BuildStatus::New,
            BuildStatus::Running,
            BuildStatus::Success,
            BuildStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert!("queued".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_lifecycle_sets_timestamps() {
        let mut build = make_build();
        let start = Utc::now();
        build.start(start).unwrap();
        assert_eq!(build.status, BuildStatus::Running);
        assert_eq!(build.started_at, Some(start));
        assert!(build.finished_at.is_none());

        let end = start + Duration::seconds(5);
        build.finish(BuildStatus::Success, end).unwrap();
        assert_eq!(build.status, BuildStatus::Success);
        assert_eq!(build.finished_at, Some(end));
        assert_eq!(build.duration(Utc::now()), Some(Duration::seconds(5)));
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let mut build = make_build();
        assert!(matches!(
            build.finish(BuildStatus::Success, Utc::now()),
            Err(Error::InvalidTransition { .. })
        ));

        build.start(Utc::now()).unwrap();
        build.finish(BuildStatus::Failed, Utc::now()).unwrap();
        assert!(build.start(Utc::now()).is_err());
        assert!(build.finish(BuildStatus::Success, Utc::now()).is_err());
    }

    #[test]
    fn test_finish_rejects_non_terminal_status() {
        let mut build = make_build();
        build.start(Utc::now()).unwrap();
        assert!(build.finish(BuildStatus::Running, Utc::now()).is_err());
    }

    #[test]
    fn test_force_failed_always_sets_finished() {
        let now = Utc::now();

        let mut running = make_build();
        running.start(now).unwrap();
        running.force_failed(now);
        assert_eq!(running.status, BuildStatus::Failed);
        assert_eq!(running.finished_at, Some(now));

        let mut fresh = make_build();
        fresh.force_failed(now);
        assert_eq!(fresh.status, BuildStatus::Failed);
        assert!(fresh.started_at.is_some());
        assert!(fresh.finished_at.is_some());

        let mut done = make_build();
        done.start(now).unwrap();
        done.finish(BuildStatus::Success, now).unwrap();
        done.force_failed(now + Duration::seconds(1));
        assert_eq!(done.status, BuildStatus::Success);
        assert_eq!(done.finished_at, Some(now));
    }

    #[test]
    fn test_abort_overrides_success() {
        let now = Utc::now();

        let mut done = make_build();
        done.start(now).unwrap();
        done.finish(BuildStatus::Success, now).unwrap();
        done.abort(now + Duration::seconds(1));
        assert_eq!(done.status, BuildStatus::Failed);
        assert_eq!(done.finished_at, Some(now));

        let mut fresh = make_build();
        fresh.abort(now);
        assert_eq!(fresh.status, BuildStatus::Failed);
        assert_eq!(fresh.finished_at, Some(now));
    }
}
