//! Variable interpolation for pipeline plugin options.
//!
//! Supports variables like:
//! - `${build.id}` - Build ID
//! - `${build.path}` - Working copy directory
//! - `${build.branch}` - Branch being built
//! - `${build.commit}` - Commit id, empty when unknown
//! - `${build.short_commit}` - First 7 characters of the commit id
//! - `${project.id}` - Project ID
//! - `${project.repository}` - Repository reference
//! - `${env.VAR_NAME}` - Environment variable
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${timestamp}` - Unix timestamp
//!
//! Single-segment names resolve to custom variables set by plugins.

use cinder_core::Build;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// Variables available to one build's plugins.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub build: BuildVars,
    pub project: ProjectVars,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by plugins
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildVars {
    pub id: String,
    pub path: String,
    pub branch: String,
    pub commit: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectVars {
    pub id: String,
    pub repository: String,
}

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for `build` checked out at `path`, with the process
    /// environment loaded.
    pub fn for_build(build: &Build, path: &Path) -> Self {
        let mut ctx = VariableContextBuilder::new()
            .with_build(build.id.to_string(), path.display().to_string())
            .with_branch(build.branch.clone())
            .with_commit(build.commit_id.clone().unwrap_or_default())
            .with_project(build.project_id.to_string(), build.repository.clone())
            .build();
        ctx.populate_env();
        ctx
    }

    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["build", "id"] => Some(self.build.id.clone()),
            ["build", "path"] => Some(self.build.path.clone()),
            ["build", "branch"] => Some(self.build.branch.clone()),
            ["build", "commit"] => Some(self.build.commit.clone()),
            ["build", "short_commit"] => Some(self.build.commit.chars().take(7).collect()),

            ["project", "id"] => Some(self.project.id.clone()),
            ["project", "repository"] => Some(self.project.repository.clone()),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),

            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Replace every `${name}` in `input`. Unknown names are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_build(mut self, id: impl Into<String>, path: impl Into<String>) -> Self {
        self.ctx.build.id = id.into();
        self.ctx.build.path = path.into();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.ctx.build.branch = branch.into();
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.ctx.build.commit = commit.into();
        self
    }

    pub fn with_project(mut self, id: impl Into<String>, repository: impl Into<String>) -> Self {
        self.ctx.project.id = id.into();
        self.ctx.project.repository = repository.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{BuildId, ProjectId};

    #[test]
    fn test_build_variables() {
        let ctx = VariableContextBuilder::new()
            .with_build("42", "/srv/cinder/build/42")
            .with_branch("main")
            .with_commit("abc1234567890")
            .build();

        let result = ctx.interpolate("Build ${build.id} of ${build.branch} at ${build.path}");
        assert_eq!(result, "Build 42 of main at /srv/cinder/build/42");
        assert_eq!(ctx.interpolate("${build.short_commit}"), "abc1234");
    }

    #[test]
    fn test_for_build() {
        let mut build = Build::new(
            BuildId::new(9),
            ProjectId::new(3),
            "/repos/widget",
            "develop",
        );
        build.commit_id = Some("deadbeef".to_string());

        let ctx = VariableContext::for_build(&build, Path::new("/tmp/build/9"));
        assert_eq!(
            ctx.interpolate("${project.id}:${project.repository}:${build.commit}"),
            "3:/repos/widget:deadbeef"
        );
        assert_eq!(ctx.interpolate("${build.path}"), "/tmp/build/9");
    }

    #[test]
    fn test_env_variables() {
        let ctx = VariableContextBuilder::new()
            .with_env("MY_VAR", "hello")
            .with_env("ANOTHER", "world")
            .build();

        let result = ctx.interpolate("${env.MY_VAR} ${env.ANOTHER}!");
        assert_eq!(result, "hello world!");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::new();
        let result = ctx.interpolate("Unknown: ${unknown.var} ${env.NOPE_NOT_SET}");
        assert_eq!(result, "Unknown: ${unknown.var} ${env.NOPE_NOT_SET}");
    }

    #[test]
    fn test_custom_variables() {
        let mut ctx = VariableContext::new();
        ctx.set("version", "1.2.3");
        ctx.set("app_name", "myapp");

        let result = ctx.interpolate("${app_name} v${version}");
        assert_eq!(result, "myapp v1.2.3");
    }

    #[test]
    fn test_interpolate_vec() {
        let ctx = VariableContextBuilder::new().with_branch("develop").build();

        let inputs = vec![
            "echo ${build.branch}".to_string(),
            "deploy to ${build.branch}".to_string(),
        ];
        let results = ctx.interpolate_vec(&inputs);
        assert_eq!(results, vec!["echo develop", "deploy to develop"]);
    }

    #[test]
    fn test_date_variable() {
        let result = VariableContext::new().interpolate("${date}");
        assert_eq!(result.len(), 10);
        assert!(result.contains('-'));
    }

    #[test]
    fn test_nested_braces() {
        let ctx = VariableContextBuilder::new().with_commit("abc123").build();

        let result = ctx.interpolate(r#"{"sha": "${build.commit}"}"#);
        assert_eq!(result, r#"{"sha": "abc123"}"#);
    }
}
