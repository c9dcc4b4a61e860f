//! Build scheduling and pipeline execution for the Cinder build orchestrator.
//!
//! The scheduler polls the build store, reclaims stuck builds and hands
//! pending builds to the pipeline, which drives each one through its
//! plugin stages.

pub mod context;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod scheduler;

pub use context::BuildContext;
pub use error::{PipelineError, PluginError, SchedulerError};
pub use notify::WebhookNotifier;
pub use pipeline::{BuildOutcome, Pipeline, StageReport};
pub use plugin::{Plugin, PluginFactory, PluginRegistry};
pub use scheduler::{Scheduler, SchedulerConfig};
