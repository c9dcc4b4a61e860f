//! Build repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinder_core::{Build, BuildId, BuildStatus, ProjectId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::debug;

use crate::{DbError, DbResult};

/// Fields supplied when submitting a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBuild {
    pub project_id: ProjectId,
    pub repository: String,
    pub branch: String,
    pub commit_id: Option<String>,
    pub config: Option<String>,
}

impl NewBuild {
    pub fn new(
        project_id: ProjectId,
        repository: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            repository: repository.into(),
            branch: branch.into(),
            commit_id: None,
            config: None,
        }
    }

    /// Submission that repeats `build`.
    pub fn duplicate_of(build: &Build) -> Self {
        Self {
            project_id: build.project_id,
            repository: build.repository.clone(),
            branch: build.branch.clone(),
            commit_id: build.commit_id.clone(),
            config: build.config.clone(),
        }
    }
}

/// A build record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BuildRecord {
    pub id: i64,
    pub project_id: i64,
    pub status: String,
    pub repository: String,
    pub branch: String,
    pub commit_id: Option<String>,
    pub config: Option<String>,
    pub log: String,
    pub working_dir: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<BuildRecord> for Build {
    type Error = DbError;

    fn try_from(record: BuildRecord) -> DbResult<Self> {
        let status: BuildStatus = record
            .status
            .parse()
            .map_err(|e: cinder_core::Error| DbError::InvalidRecord(format!("build {}: {}", record.id, e)))?;

        Ok(Build {
            id: BuildId::new(record.id),
            project_id: ProjectId::new(record.project_id),
            status,
            repository: record.repository,
            branch: record.branch,
            commit_id: record.commit_id,
            config: record.config,
            log: record.log,
            working_dir: record.working_dir.map(PathBuf::from),
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }
}

/// Store of builds, polled by the scheduler.
#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Insert a build in state NEW.
    async fn create(&self, build: NewBuild) -> DbResult<Build>;

    async fn get(&self, id: BuildId) -> DbResult<Build>;

    /// Builds with `status`, oldest first.
    async fn get_by_status(&self, status: BuildStatus) -> DbResult<Vec<Build>>;

    /// Most recently created build.
    async fn latest(&self) -> DbResult<Option<Build>>;

    /// Persist the mutable state of an existing build.
    async fn save(&self, build: &Build) -> DbResult<()>;

    /// Insert a NEW copy of `build`.
    async fn create_duplicate(&self, build: &Build) -> DbResult<Build> {
        self.create(NewBuild::duplicate_of(build)).await
    }
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_builds(records: Vec<BuildRecord>) -> DbResult<Vec<Build>> {
    records.into_iter().map(Build::try_from).collect()
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn create(&self, build: NewBuild) -> DbResult<Build> {
        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            INSERT INTO builds (project_id, status, repository, branch, commit_id, config, log, created_at)
            VALUES ($1, 'new', $2, $3, $4, $5, '', NOW())
            RETURNING *
            "#,
        )
        .bind(build.project_id.get())
        .bind(&build.repository)
        .bind(&build.branch)
        .bind(&build.commit_id)
        .bind(&build.config)
        .fetch_one(&self.pool)
        .await?;
        debug!(build_id = record.id, project_id = record.project_id, "Created build");
        record.try_into()
    }

    async fn get(&self, id: BuildId) -> DbResult<Build> {
        sqlx::query_as::<_, BuildRecord>("SELECT * FROM builds WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?
            .try_into()
    }

    async fn get_by_status(&self, status: BuildStatus) -> DbResult<Vec<Build>> {
        let records = sqlx::query_as::<_, BuildRecord>(
            "SELECT * FROM builds WHERE status = $1 ORDER BY id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        into_builds(records)
    }

    async fn latest(&self) -> DbResult<Option<Build>> {
        sqlx::query_as::<_, BuildRecord>("SELECT * FROM builds ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?
            .map(Build::try_from)
            .transpose()
    }

    async fn save(&self, build: &Build) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE builds
            SET status = $2, commit_id = $3, log = $4, working_dir = $5,
                started_at = $6, finished_at = $7
            WHERE id = $1
            "#,
        )
        .bind(build.id.get())
        .bind(build.status.as_str())
        .bind(&build.commit_id)
        .bind(&build.log)
        .bind(
            build
                .working_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(build.started_at)
        .bind(build.finished_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {}", build.id)));
        }
        Ok(())
    }
}
