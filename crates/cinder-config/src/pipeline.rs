//! Per-build pipeline configuration parsing.
//!
//! A build's pipeline is described by a KDL document, either stored with the
//! project or committed as `cinder.kdl` at the repository root:
//!
//! ```kdl
//! build-settings {
//!     verbose #true
//!     ignore "vendor" "docs"
//! }
//! setup {
//!     shell { command "composer install"; }
//! }
//! test {
//!     tool { binary "phpunit" "phpunit.phar"; args "--colors=never"; }
//! }
//! ```
//!
//! Every child of a stage node is one plugin invocation. The child's name
//! selects the plugin, its own children are the plugin options.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Name of the pipeline configuration file looked up in a working copy.
pub const CONFIG_FILE_NAME: &str = "cinder.kdl";

/// A named phase of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Setup,
    Test,
    Complete,
    Success,
    Failure,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Setup,
        Stage::Test,
        Stage::Complete,
        Stage::Success,
        Stage::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Test => "test",
            Stage::Complete => "complete",
            Stage::Success => "success",
            Stage::Failure => "failure",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "stage".to_string(),
                message: format!("unknown stage: {}", s),
            })
    }
}

/// A scalar option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    String(String),
    Bool(bool),
    Integer(i64),
}

/// Options passed to one plugin invocation. Repeated option nodes
/// accumulate their values in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginOptions {
    values: BTreeMap<String, Vec<ConfigValue>>,
}

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ConfigValue) {
        self.values.entry(name.into()).or_default().push(value);
    }

    /// Builder-style [`PluginOptions::insert`] for string values.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, ConfigValue::String(value.into()));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn values(&self, name: &str) -> &[ConfigValue] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First string value of an option.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values(name).iter().find_map(|v| match v {
            ConfigValue::String(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Every string value of an option, in declaration order.
    pub fn get_strings(&self, name: &str) -> Vec<String> {
        self.values(name)
            .iter()
            .filter_map(|v| match v {
                ConfigValue::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.values(name).iter().find_map(|v| match v {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        })
    }

    pub fn get_integer(&self, name: &str) -> Option<i64> {
        self.values(name).iter().find_map(|v| match v {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        })
    }
}

/// One plugin invocation within a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    /// Registry identifier of the plugin.
    pub name: String,
    pub options: PluginOptions,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>, options: PluginOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// Parsed pipeline configuration for one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Record informational output in the build log.
    pub verbose: bool,
    /// Paths plugins should leave alone, relative to the working copy.
    pub ignore: Vec<String>,
    stages: HashMap<Stage, Vec<PluginSpec>>,
}

impl PipelineConfig {
    /// Plugin invocations for a stage, in configured order.
    pub fn plugins(&self, stage: Stage) -> &[PluginSpec] {
        self.stages.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_plugin(&mut self, stage: Stage, plugin: PluginSpec) {
        self.stages.entry(stage).or_default().push(plugin);
    }

    /// Read `cinder.kdl` from a working copy. `Ok(None)` when the file does
    /// not exist.
    pub fn from_working_copy(path: &Path) -> ConfigResult<Option<Self>> {
        let file = path.join(CONFIG_FILE_NAME);
        match std::fs::read_to_string(&file) {
            Ok(content) => parse_pipeline_config(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Parse a pipeline configuration from KDL text.
pub fn parse_pipeline_config(kdl: &str) -> ConfigResult<PipelineConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = PipelineConfig::default();
    let mut seen_settings = false;

    for node in doc.nodes() {
        let name = node.name().value();
        if name == "build-settings" {
            if seen_settings {
                return Err(ConfigError::Duplicate("build-settings".to_string()));
            }
            seen_settings = true;
            parse_build_settings(node, &mut config)?;
            continue;
        }

        let Ok(stage) = name.parse::<Stage>() else {
            continue; // Ignore unknown nodes
        };
        if config.stages.contains_key(&stage) {
            return Err(ConfigError::Duplicate(format!("stage '{}'", stage)));
        }

        let mut plugins = Vec::new();
        if let Some(children) = node.children() {
            for child in children.nodes() {
                plugins.push(PluginSpec {
                    name: child.name().value().to_string(),
                    options: parse_options(child)?,
                });
            }
        }
        config.stages.insert(stage, plugins);
    }

    Ok(config)
}

fn parse_build_settings(node: &KdlNode, config: &mut PipelineConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "verbose" => {
                config.verbose = match get_first_arg(child) {
                    None => true,
                    Some(value) => value.as_bool().ok_or_else(|| ConfigError::InvalidValue {
                        field: "build-settings.verbose".to_string(),
                        message: "expected #true or #false".to_string(),
                    })?,
                };
            }
            "ignore" => {
                config.ignore.extend(get_all_string_args(child));
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_options(node: &KdlNode) -> ConfigResult<PluginOptions> {
    let mut options = PluginOptions::new();
    let Some(children) = node.children() else {
        return Ok(options);
    };

    for child in children.nodes() {
        let key = child.name().value().to_string();
        let args: Vec<&KdlValue> = child
            .entries()
            .iter()
            .filter(|e| e.name().is_none())
            .map(|e| e.value())
            .collect();

        // A bare option node is a flag.
        if args.is_empty() {
            options.insert(key, ConfigValue::Bool(true));
            continue;
        }

        for value in args {
            let value = convert_value(value).ok_or_else(|| ConfigError::InvalidValue {
                field: format!("{}.{}", node.name().value(), key),
                message: format!("unsupported value: {:?}", value),
            })?;
            options.insert(key.clone(), value);
        }
    }
    Ok(options)
}

fn convert_value(value: &KdlValue) -> Option<ConfigValue> {
    if let Some(s) = value.as_string() {
        return Some(ConfigValue::String(s.to_string()));
    }
    if let Some(b) = value.as_bool() {
        return Some(ConfigValue::Bool(b));
    }
    value
        .as_integer()
        .and_then(|i| i64::try_from(i).ok())
        .map(ConfigValue::Integer)
}

// Helper functions for extracting values from KDL nodes

fn get_first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    get_first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stages_in_order() {
        let kdl = r#"
            setup {
                shell {
                    command "composer install"
                }
            }

            test {
                tool {
                    binary "phpunit" "phpunit.phar"
                    args "--colors=never"
                }
                shell {
                    command "php -l src"
                    command "php -l tests"
                }
            }

            failure {
                shell { command "echo failed"; }
            }
        "#;

        let config = parse_pipeline_config(kdl).unwrap();
        assert_eq!(config.plugins(Stage::Setup).len(), 1);
        assert_eq!(config.plugins(Stage::Setup)[0].name, "shell");

        let test = config.plugins(Stage::Test);
        assert_eq!(test.len(), 2);
        assert_eq!(test[0].name, "tool");
        assert_eq!(
            test[0].options.get_strings("binary"),
            vec!["phpunit", "phpunit.phar"]
        );
        assert_eq!(
            test[1].options.get_strings("command"),
            vec!["php -l src", "php -l tests"]
        );

        assert!(config.plugins(Stage::Complete).is_empty());
        assert_eq!(config.plugins(Stage::Failure).len(), 1);
    }

    #[test]
    fn test_parse_build_settings() {
        let kdl = r#"
            build-settings {
                verbose #true
                ignore "vendor" "docs"
                ignore "build"
            }
        "#;

        let config = parse_pipeline_config(kdl).unwrap();
        assert!(config.verbose);
        assert_eq!(config.ignore, vec!["vendor", "docs", "build"]);
    }

    #[test]
    fn test_defaults_when_settings_missing() {
        let kdl = r#"
            test {
                shell { command "true"; }
            }
        "#;
        let config = parse_pipeline_config(kdl).unwrap();
        assert!(!config.verbose);
        assert!(config.ignore.is_empty());
    }

    #[test]
    fn test_option_flags_and_scalars() {
        let kdl = r#"
            success {
                copy_build {
                    directory "/srv/www"
                    wipe
                    respect_ignore #false
                    retries 3
                }
            }
        "#;

        let config = parse_pipeline_config(kdl).unwrap();
        let options = &config.plugins(Stage::Success)[0].options;
        assert_eq!(options.get_str("directory"), Some("/srv/www"));
        assert_eq!(options.get_bool("wipe"), Some(true));
        assert_eq!(options.get_bool("respect_ignore"), Some(false));
        assert_eq!(options.get_integer("retries"), Some(3));
        assert!(!options.contains("missing"));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let kdl = r#"
            test {
                shell { command "a"; }
            }
            test {
                shell { command "b"; }
            }
        "#;
        assert!(matches!(
            parse_pipeline_config(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_invalid_verbose_rejected() {
        let kdl = r#"build-settings { verbose "yes"; }"#;
        assert!(matches!(
            parse_pipeline_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("deploy".parse::<Stage>().is_err());
    }

    #[test]
    fn test_from_working_copy_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PipelineConfig::from_working_copy(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "build-settings { verbose #true; }",
        )
        .unwrap();
        let config = PipelineConfig::from_working_copy(dir.path()).unwrap().unwrap();
        assert!(config.verbose);
    }
}
