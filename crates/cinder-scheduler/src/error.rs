//! Scheduler error types.

use cinder_config::{ConfigError, Stage};
use cinder_core::{BuildId, BuildStatus};
use cinder_db::DbError;
use thiserror::Error;

/// A plugin could not run. Distinct from a plugin reporting failure,
/// which is `Ok(false)`.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown plugin: {0}")]
    Unknown(String),

    #[error("invalid option for {plugin}: {message}")]
    InvalidOption { plugin: String, message: String },

    #[error("could not find binary: {0}")]
    MissingBinary(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a pipeline run was aborted.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("build {id} cannot start from status {status}")]
    NotStartable { id: BuildId, status: BuildStatus },

    #[error("could not create a working copy")]
    WorkingCopy,

    #[error("provisioning failed: {0}")]
    Provisioning(#[from] cinder_core::Error),

    #[error("no pipeline configuration found")]
    MissingConfig,

    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{stage} stage, plugin {plugin}: {source}")]
    Plugin {
        stage: Stage,
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("build cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] DbError),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] DbError),

    #[error("build {id} is {status}, only new builds can be run")]
    NotPending { id: BuildId, status: BuildStatus },
}
