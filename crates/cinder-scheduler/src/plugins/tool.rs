//! Runs a tool resolved through the binary locator.

use async_trait::async_trait;
use cinder_config::PluginOptions;

use crate::{BuildContext, Plugin, PluginError};

/// `tool { binary "phpunit" "phpunit.phar"; args "--colors=never" }`
///
/// The first binary candidate found wins. A tool that cannot be found
/// aborts the build rather than failing the stage.
#[derive(Debug, Clone)]
pub struct ToolPlugin {
    binaries: Vec<String>,
    args: Vec<String>,
}

impl ToolPlugin {
    pub fn new(binaries: Vec<String>, args: Vec<String>) -> Self {
        Self { binaries, args }
    }

    pub fn from_options(options: &PluginOptions) -> Result<Self, PluginError> {
        let binaries = options.get_strings("binary");
        if binaries.is_empty() {
            return Err(PluginError::InvalidOption {
                plugin: "tool".to_string(),
                message: "at least one binary is required".to_string(),
            });
        }
        Ok(Self::new(binaries, options.get_strings("args")))
    }
}

#[async_trait]
impl Plugin for ToolPlugin {
    fn name(&self) -> &'static str {
        "tool"
    }

    async fn execute(&self, ctx: &BuildContext) -> Result<bool, PluginError> {
        let path = ctx
            .locator()
            .find(&self.binaries, Some(ctx.build_path()))
            .await
            .ok_or_else(|| PluginError::MissingBinary(self.binaries.join(", ")))?;

        let mut argv = vec![path.to_string_lossy().into_owned()];
        argv.extend(self.args.iter().map(|arg| ctx.interpolate(arg)));
        let template = vec!["%s"; argv.len()].join(" ");

        let result = ctx.runner().run(&template, &argv).await;
        if result.cancelled {
            return Err(PluginError::Cancelled);
        }
        Ok(result.success)
    }
}
