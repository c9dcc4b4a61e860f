//! KDL configuration parsing for the Cinder build orchestrator.
//!
//! This crate handles parsing of:
//! - Per-build pipeline definitions (cinder.kdl in the working copy)
//! - System configuration (daemon, scheduler, binary lookup)
//! - Variable interpolation

pub mod error;
pub mod pipeline;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use pipeline::{
    CONFIG_FILE_NAME, ConfigValue, PipelineConfig, PluginOptions, PluginSpec, Stage,
    parse_pipeline_config,
};
pub use system::{SystemConfig, parse_system_config};
pub use variables::{VariableContext, VariableContextBuilder};
