//! Status and stop commands for a running daemon.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::{DaemonError, DaemonResult, FileMutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { pid: Option<u32> },
    Stopped,
}

impl DaemonStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, DaemonStatus::Running { .. })
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonStatus::Running { pid: Some(pid) } => write!(f, "running (pid {})", pid),
            DaemonStatus::Running { pid: None } => write!(f, "running"),
            DaemonStatus::Stopped => write!(f, "not running"),
        }
    }
}

/// Probe the lock file. A stale lock file is removed as a side effect.
pub fn daemon_status(lock_path: &Path) -> DaemonResult<DaemonStatus> {
    let mutex = FileMutex::new(lock_path);
    if !lock_path.exists() {
        return Ok(DaemonStatus::Stopped);
    }
    match mutex.owner_pid().map_err(DaemonError::Lock)? {
        Some(pid) => Ok(DaemonStatus::Running { pid: Some(pid) }),
        None if lock_path.exists() => Ok(DaemonStatus::Running { pid: None }),
        None => Ok(DaemonStatus::Stopped),
    }
}

/// Send SIGTERM to the lock owner. Returns the signalled pid, or `None`
/// when no daemon is running.
pub fn stop_daemon(lock_path: &Path) -> DaemonResult<Option<u32>> {
    let Some(pid) = FileMutex::new(lock_path)
        .owner_pid()
        .map_err(DaemonError::Lock)?
    else {
        return Ok(None);
    };

    let raw = i32::try_from(pid).map_err(|_| DaemonError::Signal {
        pid,
        source: nix::errno::Errno::ESRCH,
    })?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|source| DaemonError::Signal { pid, source })?;
    info!(pid, "Sent SIGTERM to daemon");
    Ok(Some(pid))
}
