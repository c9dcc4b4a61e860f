//! Daemon error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon already running{}", .pid.map(|p| format!(" (pid {})", p)).unwrap_or_default())]
    AlreadyRunning { pid: Option<u32> },

    #[error("lock error: {0}")]
    Lock(#[source] std::io::Error),

    #[error("could not install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("could not signal daemon (pid {pid}): {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },
}

pub type DaemonResult<T> = Result<T, DaemonError>;
