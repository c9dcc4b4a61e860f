//! CLI command implementations.

pub mod builds;
pub mod daemon;

use anyhow::{Context, Result};
use cinder_config::SystemConfig;
use cinder_db::{BuildRepo, PgBuildRepo};
use cinder_executor::{BinaryLocator, RepositoryProvisioner};
use cinder_scheduler::{Pipeline, PluginRegistry, Scheduler, SchedulerConfig, WebhookNotifier};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Load the system configuration, applying a database URL given on the
/// command line or through `DATABASE_URL`.
pub fn load_config(path: &Path, home: &Path, database_url: Option<String>) -> Result<SystemConfig> {
    let mut config = SystemConfig::load(path, home)
        .with_context(|| format!("Failed to load configuration: {}", path.display()))?;
    if let Some(url) = database_url.or_else(|| std::env::var("DATABASE_URL").ok()) {
        config.database_url = Some(url);
    }
    Ok(config)
}

/// Connect to the build store and assemble a scheduler.
pub async fn connect(config: &SystemConfig, cancel: CancellationToken) -> Result<Scheduler> {
    let url = config
        .database_url
        .as_deref()
        .context("No database configured, set CINDER_DATABASE_URL or database-url")?;

    let pool = cinder_db::create_pool(url)
        .await
        .context("Failed to connect to database")?;
    cinder_db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Connected to database");

    Ok(scheduler_with_repo(config, Arc::new(PgBuildRepo::new(pool)), cancel))
}

/// Assemble a scheduler over an existing build store.
pub fn scheduler_with_repo(
    config: &SystemConfig,
    repo: Arc<dyn BuildRepo>,
    cancel: CancellationToken,
) -> Scheduler {
    let locator = BinaryLocator::new(
        config.binaries.local_paths.clone(),
        &config.binaries.root_bin_dir,
        &config.binaries.manifest,
    );

    let mut pipeline = Pipeline::new(
        repo.clone(),
        Arc::new(RepositoryProvisioner::new()),
        Arc::new(PluginRegistry::with_builtins()),
        locator,
        &config.build_root,
    )
    .with_cancellation(cancel);
    if let Some(url) = &config.notify.webhook {
        pipeline = pipeline.with_notifier(Arc::new(WebhookNotifier::new(url)));
    }

    Scheduler::new(repo, pipeline, SchedulerConfig::from(&config.scheduler))
}
