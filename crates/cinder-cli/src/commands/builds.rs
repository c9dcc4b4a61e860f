//! One-shot build commands.

use anyhow::{Context, Result};
use cinder_core::BuildId;
use cinder_scheduler::Scheduler;

/// Run one scheduler cycle, or the given build only.
pub async fn run_builds(
    scheduler: &Scheduler,
    max_builds: Option<usize>,
    build_id: Option<BuildId>,
) -> Result<()> {
    if let Some(id) = build_id {
        let build = scheduler
            .run_build_by_id(id)
            .await
            .with_context(|| format!("Failed to run build {}", id))?;
        println!("Build {}: {}", build.id, build.status);
        return Ok(());
    }

    let max_builds = max_builds.unwrap_or(scheduler.config().max_builds);
    let count = scheduler
        .run_once(max_builds)
        .await
        .context("Scheduler cycle failed")?;
    if count == 0 {
        println!("No builds to run");
    } else {
        println!("Ran {} build(s)", count);
    }
    Ok(())
}

/// Duplicate the most recent build and run the copy.
pub async fn rebuild(scheduler: &Scheduler) -> Result<()> {
    match scheduler.rebuild_latest().await.context("Rebuild failed")? {
        Some(build) => println!("Build {}: {}", build.id, build.status),
        None => println!("No builds to rebuild"),
    }
    Ok(())
}
