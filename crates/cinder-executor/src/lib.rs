//! Subprocess execution for the Cinder build orchestrator.
//!
//! Provides:
//! - `ProcessRunner` for running external tools without a shell
//! - `BinaryLocator` for resolving tool names to executables
//! - Working-copy provisioners (local directory, git)

pub mod locator;
pub mod process;
pub mod workspace;

pub use locator::BinaryLocator;
pub use process::{CommandResult, CommandSpec, CommandTemplate, ProcessRunner, TemplateError};
pub use workspace::{GitProvisioner, LocalCopyProvisioner, RepositoryProvisioner};
