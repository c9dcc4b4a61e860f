//! Built-in plugins.

mod copy_build;
mod shell;
mod tool;

pub use copy_build::CopyBuildPlugin;
pub use shell::ShellPlugin;
pub use tool::ToolPlugin;

use crate::{Plugin, PluginRegistry};

pub(crate) fn register_builtins(registry: &mut PluginRegistry) {
    registry.register("shell", |options| {
        Ok(Box::new(ShellPlugin::from_options(options)?) as Box<dyn Plugin>)
    });
    registry.register("tool", |options| {
        Ok(Box::new(ToolPlugin::from_options(options)?) as Box<dyn Plugin>)
    });
    registry.register("copy_build", |options| {
        Ok(Box::new(CopyBuildPlugin::from_options(options)) as Box<dyn Plugin>)
    });
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::BuildContext;
    use cinder_core::{Build, BuildId, BuildLogger, ProjectId};
    use cinder_executor::BinaryLocator;
    use std::path::Path;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Context for a build checked out at `path`.
    pub fn context_at(path: &Path) -> BuildContext {
        let build = Build::new(BuildId::new(1), ProjectId::new(1), "/srv/repo", "main");
        BuildContext::new(
            &build,
            path,
            Arc::new(BuildLogger::new(build.id)),
            BinaryLocator::new(vec!["vendor/bin".into()], path.join("no-root-bin"), "composer.json"),
            CancellationToken::new(),
        )
    }
}
