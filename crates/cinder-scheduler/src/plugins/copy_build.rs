//! Copies the working copy to another directory.

use async_trait::async_trait;
use cinder_config::PluginOptions;
use std::path::{Path, PathBuf};

use crate::{BuildContext, Plugin, PluginError};

/// `copy_build { directory "/srv/www/app"; wipe #true; respect_ignore #true }`
///
/// Without `directory` the target is the working copy itself, which is
/// reported as a failure.
#[derive(Debug, Clone, Default)]
pub struct CopyBuildPlugin {
    directory: Option<String>,
    wipe: bool,
    respect_ignore: bool,
}

impl CopyBuildPlugin {
    pub fn from_options(options: &PluginOptions) -> Self {
        Self {
            directory: options.get_str("directory").map(str::to_string),
            wipe: options.get_bool("wipe").unwrap_or(false),
            respect_ignore: options.get_bool("respect_ignore").unwrap_or(false),
        }
    }

    fn target(&self, ctx: &BuildContext) -> PathBuf {
        match &self.directory {
            Some(dir) => PathBuf::from(ctx.interpolate(dir)),
            None => ctx.build_path().to_path_buf(),
        }
    }

    async fn wipe_existing(&self, ctx: &BuildContext, target: &Path) -> Result<(), PluginError> {
        if !self.wipe || target == Path::new("/") || !target.is_dir() {
            return Ok(());
        }

        let result = ctx
            .runner()
            .run("rm -Rf %s", &[target.to_string_lossy()])
            .await;
        if !result.success {
            return Err(PluginError::Failed(format!(
                "failed to wipe existing directory {}",
                target.display()
            )));
        }
        Ok(())
    }

    async fn delete_ignored(&self, ctx: &BuildContext, target: &Path) {
        if !self.respect_ignore {
            return;
        }
        for path in ctx.ignore() {
            let ignored = target.join(path.trim_start_matches('/'));
            ctx.runner()
                .run("rm -Rf %s", &[ignored.to_string_lossy()])
                .await;
        }
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.components().eq(b.components()),
    }
}

#[async_trait]
impl Plugin for CopyBuildPlugin {
    fn name(&self) -> &'static str {
        "copy_build"
    }

    async fn execute(&self, ctx: &BuildContext) -> Result<bool, PluginError> {
        let build = ctx.build_path();
        let target = self.target(ctx);
        if same_path(&target, build) {
            return Ok(false);
        }

        self.wipe_existing(ctx, &target).await?;

        let mkdir = ctx
            .runner()
            .run("mkdir -p %s", &[target.to_string_lossy()])
            .await;
        if !mkdir.success {
            return Ok(false);
        }

        let copy = ctx
            .runner()
            .run(
                "cp -R %s %s",
                &[build.join(".").to_string_lossy(), target.to_string_lossy()],
            )
            .await;

        self.delete_ignored(ctx, &target).await;

        if copy.cancelled {
            return Err(PluginError::Cancelled);
        }
        Ok(copy.success)
    }
}
