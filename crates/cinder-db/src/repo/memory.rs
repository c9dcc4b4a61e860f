//! In-memory build repository.

use async_trait::async_trait;
use chrono::Utc;
use cinder_core::{Build, BuildId, BuildStatus};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::build::{BuildRepo, NewBuild};
use crate::{DbError, DbResult};

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    builds: BTreeMap<BuildId, Build>,
}

/// Build store kept in process memory. Used by tests and one-off runs
/// without a database.
#[derive(Debug, Default)]
pub struct MemoryBuildRepo {
    state: Mutex<MemoryState>,
}

impl MemoryBuildRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `build` as given, keeping its id and state.
    pub async fn insert(&self, build: Build) {
        let mut state = self.state.lock().await;
        state.last_id = state.last_id.max(build.id.get());
        state.builds.insert(build.id, build);
    }

    /// Every stored build in id order.
    pub async fn all(&self) -> Vec<Build> {
        self.state.lock().await.builds.values().cloned().collect()
    }
}

#[async_trait]
impl BuildRepo for MemoryBuildRepo {
    async fn create(&self, new: NewBuild) -> DbResult<Build> {
        let mut state = self.state.lock().await;
        state.last_id += 1;
        let mut build = Build::new(
            BuildId::new(state.last_id),
            new.project_id,
            new.repository,
            new.branch,
        );
        build.commit_id = new.commit_id;
        build.config = new.config;
        build.created_at = Utc::now();
        state.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn get(&self, id: BuildId) -> DbResult<Build> {
        self.state
            .lock()
            .await
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn get_by_status(&self, status: BuildStatus) -> DbResult<Vec<Build>> {
        Ok(self
            .state
            .lock()
            .await
            .builds
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect())
    }

    async fn latest(&self) -> DbResult<Option<Build>> {
        Ok(self
            .state
            .lock()
            .await
            .builds
            .values()
            .next_back()
            .cloned())
    }

    async fn save(&self, build: &Build) -> DbResult<()> {
        let mut state = self.state.lock().await;
        match state.builds.get_mut(&build.id) {
            Some(stored) => {
                *stored = build.clone();
                Ok(())
            }
            None => Err(DbError::NotFound(format!("build {}", build.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::ProjectId;

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let repo = MemoryBuildRepo::new();
        let first = repo
            .create(NewBuild::new(ProjectId::new(1), "/srv/a", "main"))
            .await
            .unwrap();
        let second = repo
            .create(NewBuild::new(ProjectId::new(2), "/srv/b", "main"))
            .await
            .unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.status, BuildStatus::New);
        assert_eq!(repo.latest().await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_get_by_status_in_creation_order() {
        let repo = MemoryBuildRepo::new();
        for project in [3, 1, 2] {
            repo.create(NewBuild::new(ProjectId::new(project), "/srv/x", "main"))
                .await
                .unwrap();
        }
        let mut running = repo.get(BuildId::new(2)).await.unwrap();
        running.start(Utc::now()).unwrap();
        repo.save(&running).await.unwrap();

        let pending: Vec<i64> = repo
            .get_by_status(BuildStatus::New)
            .await
            .unwrap()
            .iter()
            .map(|b| b.id.get())
            .collect();
        assert_eq!(pending, vec![1, 3]);
        assert_eq!(
            repo.get_by_status(BuildStatus::Running).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_save_unknown_build() {
        let repo = MemoryBuildRepo::new();
        let build = Build::new(BuildId::new(99), ProjectId::new(1), "/srv/x", "main");
        assert!(matches!(
            repo.save(&build).await,
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            repo.get(BuildId::new(99)).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let repo = MemoryBuildRepo::new();
        let mut original = repo
            .create(NewBuild {
                commit_id: Some("abc".to_string()),
                ..NewBuild::new(ProjectId::new(7), "/srv/x", "feature")
            })
            .await
            .unwrap();
        original.start(Utc::now()).unwrap();
        original.finish(BuildStatus::Failed, Utc::now()).unwrap();
        repo.save(&original).await.unwrap();

        let copy = repo.create_duplicate(&original).await.unwrap();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.status, BuildStatus::New);
        assert_eq!(copy.project_id, ProjectId::new(7));
        assert_eq!(copy.commit_id.as_deref(), Some("abc"));
        assert!(copy.started_at.is_none());
    }

    #[tokio::test]
    async fn test_insert_keeps_ids_unique() {
        let repo = MemoryBuildRepo::new();
        repo.insert(Build::new(BuildId::new(10), ProjectId::new(1), "/srv/x", "main"))
            .await;
        let next = repo
            .create(NewBuild::new(ProjectId::new(1), "/srv/x", "main"))
            .await
            .unwrap();
        assert_eq!(next.id, BuildId::new(11));
        assert_eq!(repo.all().await.len(), 2);
    }
}
