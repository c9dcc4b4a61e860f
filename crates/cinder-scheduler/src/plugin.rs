//! Plugin contract and registry.

use async_trait::async_trait;
use cinder_config::{PluginOptions, PluginSpec};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{BuildContext, PluginError};

/// A unit of work within a stage.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registry identifier.
    fn name(&self) -> &'static str;

    /// Run the plugin. `Ok(false)` fails the stage; `Err` aborts the
    /// whole build.
    async fn execute(&self, ctx: &BuildContext) -> Result<bool, PluginError>;
}

/// Builds a plugin from its configured options.
pub type PluginFactory =
    Arc<dyn Fn(&PluginOptions) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync>;

/// Maps plugin identifiers to factories.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("PluginRegistry")
            .field("plugins", &names)
            .finish()
    }
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `shell`, `tool` and `copy_build` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_builtins(&mut registry);
        registry
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&PluginOptions) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the plugin named by a stage entry.
    pub fn create(&self, spec: &PluginSpec) -> Result<Box<dyn Plugin>, PluginError> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| PluginError::Unknown(spec.name.clone()))?;
        factory(&spec.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(bool);

    #[async_trait]
    impl Plugin for Constant {
        fn name(&self) -> &'static str {
            "constant"
        }

        async fn execute(&self, _ctx: &BuildContext) -> Result<bool, PluginError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = PluginRegistry::new();
        registry.register("constant", |options: &PluginOptions| {
            Ok(Box::new(Constant(options.get_bool("value").unwrap_or(true))) as Box<dyn Plugin>)
        });

        assert!(registry.contains("constant"));
        let plugin = registry
            .create(&PluginSpec::new("constant", PluginOptions::new()))
            .unwrap();
        assert_eq!(plugin.name(), "constant");
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::new();
        let result = registry.create(&PluginSpec::new("missing", PluginOptions::new()));
        assert!(matches!(result, Err(PluginError::Unknown(name)) if name == "missing"));
    }

    #[test]
    fn test_builtins_registered() {
        let registry = PluginRegistry::with_builtins();
        for name in ["shell", "tool", "copy_build"] {
            assert!(registry.contains(name), "{} missing", name);
        }
    }
}
