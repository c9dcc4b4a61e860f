//! Core domain types and traits for the Cinder build orchestrator.
//!
//! This crate contains:
//! - Build identifiers and the build lifecycle
//! - The error type shared by the other crates
//! - The per-build log sink
//! - Traits for the collaborators a pipeline run consumes
//!   (working-copy provisioning, status notification)

pub mod build;
pub mod error;
pub mod id;
pub mod log;
pub mod notify;
pub mod provision;

pub use build::{Build, BuildStatus};
pub use error::{Error, Result};
pub use id::{BuildId, ProjectId};
pub use log::{BuildLogger, LogLevel, LogSink};
pub use notify::{NoopNotifier, StatusNotifier};
pub use provision::WorkingCopyProvisioner;
