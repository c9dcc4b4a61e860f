//! Runs shell commands in the working copy.

use async_trait::async_trait;
use cinder_config::PluginOptions;
use tracing::debug;

use crate::{BuildContext, Plugin, PluginError};

/// `shell { command "make" ; command "make test" }`
///
/// Every command runs, in order, even after one fails. The plugin succeeds
/// only if all of them do.
#[derive(Debug, Clone)]
pub struct ShellPlugin {
    commands: Vec<String>,
}

impl ShellPlugin {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    pub fn from_options(options: &PluginOptions) -> Result<Self, PluginError> {
        let commands = options.get_strings("command");
        if commands.is_empty() {
            return Err(PluginError::InvalidOption {
                plugin: "shell".to_string(),
                message: "at least one command is required".to_string(),
            });
        }
        Ok(Self::new(commands))
    }
}

#[async_trait]
impl Plugin for ShellPlugin {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(&self, ctx: &BuildContext) -> Result<bool, PluginError> {
        let mut success = true;
        for command in &self.commands {
            let command = ctx.interpolate(command);
            debug!(build_id = %ctx.build_id(), command = %command, "Running shell command");
            ctx.logger().info(&format!("$ {}", command));

            let result = ctx.runner().run("sh -c %s", &[command.as_str()]).await;
            if result.cancelled {
                return Err(PluginError::Cancelled);
            }
            success &= result.success;
        }
        Ok(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::context_at;

    #[test]
    fn test_requires_command() {
        assert!(matches!(
            ShellPlugin::from_options(&PluginOptions::new()),
            Err(PluginError::InvalidOption { .. })
        ));
    }

    #[tokio::test]
    async fn test_runs_in_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_at(dir.path());
        let plugin = ShellPlugin::new(vec!["touch built-${build.id}".to_string()]);

        assert!(plugin.execute(&ctx).await.unwrap());
        assert!(dir.path().join("built-1").exists());
    }

    #[tokio::test]
    async fn test_all_commands_run_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_at(dir.path());
        let plugin = ShellPlugin::new(vec!["false".to_string(), "touch after".to_string()]);

        assert!(!plugin.execute(&ctx).await.unwrap());
        assert!(dir.path().join("after").exists());
    }
}
