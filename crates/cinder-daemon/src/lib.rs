//! Daemon process support for the Cinder build orchestrator.
//!
//! A single daemon per host holds a PID lock file and runs scheduler
//! cycles in-process until it receives a termination signal.

pub mod control;
pub mod error;
pub mod mutex;
pub mod supervisor;

pub use control::{DaemonStatus, daemon_status, stop_daemon};
pub use error::{DaemonError, DaemonResult};
pub use mutex::FileMutex;
pub use supervisor::{CycleRunner, DaemonState, DaemonSupervisor};
