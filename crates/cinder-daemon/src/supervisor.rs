//! Supervisor loop for the build daemon.

use async_trait::async_trait;
use cinder_scheduler::{Scheduler, SchedulerError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{DaemonError, DaemonResult, FileMutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// One unit of work repeated by the supervisor.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    type Error: std::fmt::Display + Send;

    /// Run one cycle and return how many builds it dispatched.
    async fn run_cycle(&self) -> Result<usize, Self::Error>;
}

#[async_trait]
impl CycleRunner for Scheduler {
    type Error = SchedulerError;

    async fn run_cycle(&self) -> Result<usize, SchedulerError> {
        self.run_once(self.config().max_builds).await
    }
}

/// Owns the daemon lock and drives cycles until cancelled.
#[derive(Debug)]
pub struct DaemonSupervisor {
    lock: FileMutex,
    interval: Duration,
    cancel: CancellationToken,
    state: watch::Sender<DaemonState>,
}

impl DaemonSupervisor {
    /// Take the daemon lock at `lock_path`.
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] when a live daemon holds it.
    pub fn start(lock_path: impl Into<PathBuf>, interval: Duration) -> DaemonResult<Self> {
        let (state, _) = watch::channel(DaemonState::Starting);
        let mut lock = FileMutex::new(lock_path);

        if !lock.acquire().map_err(DaemonError::Lock)? {
            let pid = lock.owner_pid().map_err(DaemonError::Lock)?;
            state.send_replace(DaemonState::Stopped);
            return Err(DaemonError::AlreadyRunning { pid });
        }
        info!(lock = %lock.path().display(), pid = std::process::id(), "Daemon lock acquired");

        Ok(Self {
            lock,
            interval,
            cancel: CancellationToken::new(),
            state,
        })
    }

    /// Use `token` to stop the loop. Share it with the pipeline so a
    /// shutdown also interrupts running commands.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    /// Cancel on SIGTERM or SIGINT and ignore SIGHUP.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_signal_handlers(&self) -> DaemonResult<CancellationToken> {
        let mut sigterm = signal(SignalKind::terminate()).map_err(DaemonError::Signals)?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(DaemonError::Signals)?;
        let mut sighup = signal(SignalKind::hangup()).map_err(DaemonError::Signals)?;
        let token = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                        break;
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT, shutting down");
                        break;
                    }
                    _ = sighup.recv() => {
                        debug!("Ignoring SIGHUP");
                    }
                    _ = token.cancelled() => return,
                }
            }
            token.cancel();
        });

        Ok(self.cancel.clone())
    }

    /// Run cycles until cancelled, then release the lock.
    ///
    /// A failing cycle is logged and the loop carries on.
    pub async fn run<R: CycleRunner + ?Sized>(&mut self, runner: &R) -> DaemonResult<()> {
        self.state.send_replace(DaemonState::Running);
        info!(interval = ?self.interval, "Daemon running");

        while !self.cancel.is_cancelled() {
            match runner.run_cycle().await {
                Ok(0) => debug!("No builds dispatched"),
                Ok(count) => info!(count, "Cycle finished"),
                Err(e) => error!(error = %e, "Cycle failed"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state.send_replace(DaemonState::Stopping);
        info!("Daemon stopping");
        let released = self.lock.release();
        self.state.send_replace(DaemonState::Stopped);
        if let Err(e) = &released {
            warn!(error = %e, "Failed to release daemon lock");
        }
        released.map_err(DaemonError::Lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts cycles and cancels after `limit` of them.
    struct Counter {
        cycles: AtomicUsize,
        limit: usize,
        fail: bool,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl CycleRunner for Counter {
        type Error = String;

        async fn run_cycle(&self) -> Result<usize, String> {
            let n = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.limit {
                self.cancel.cancel();
            }
            if self.fail {
                return Err("store unavailable".to_string());
            }
            Ok(1)
        }
    }

    fn counter(limit: usize, fail: bool, cancel: &CancellationToken) -> Counter {
        Counter {
            cycles: AtomicUsize::new(0),
            limit,
            fail,
            cancel: cancel.clone(),
        }
    }

    #[tokio::test]
    async fn test_runs_until_cancelled_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("daemon.pid");

        let mut supervisor = DaemonSupervisor::start(&lock, Duration::from_millis(5)).unwrap();
        assert_eq!(supervisor.state(), DaemonState::Starting);
        assert!(lock.exists());

        let runner = counter(3, false, &supervisor.cancellation_token());
        supervisor.run(&runner).await.unwrap();

        assert_eq!(runner.cycles.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.state(), DaemonState::Stopped);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn test_failed_cycles_do_not_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor =
            DaemonSupervisor::start(dir.path().join("daemon.pid"), Duration::from_millis(1))
                .unwrap();

        let runner = counter(4, true, &supervisor.cancellation_token());
        supervisor.run(&runner).await.unwrap();
        assert_eq!(runner.cycles.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_second_start_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("daemon.pid");

        let _first = DaemonSupervisor::start(&lock, Duration::from_secs(15)).unwrap();
        let err = DaemonSupervisor::start(&lock, Duration::from_secs(15)).unwrap_err();
        match err {
            DaemonError::AlreadyRunning { pid } => assert_eq!(pid, Some(std::process::id())),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor =
            DaemonSupervisor::start(dir.path().join("daemon.pid"), Duration::from_secs(3600))
                .unwrap();
        let token = supervisor.cancellation_token();
        let runner = counter(usize::MAX, false, &token);

        let stop = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), supervisor.run(&runner))
            .await
            .unwrap()
            .unwrap();
        stop.await.unwrap();
        assert_eq!(runner.cycles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_install_signal_handlers_shares_token() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let supervisor =
            DaemonSupervisor::start(dir.path().join("daemon.pid"), Duration::from_secs(15))
                .unwrap()
                .with_cancellation(token.clone());

        let installed = supervisor.install_signal_handlers().unwrap();
        installed.cancel();
        assert!(token.is_cancelled());
    }

    // Signals are process-wide; keep this the only test that raises them.
    #[tokio::test]
    async fn test_sighup_is_ignored_and_sigterm_stops() {
        use nix::sys::signal::{Signal, raise};

        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("daemon.pid");
        let mut supervisor = DaemonSupervisor::start(&lock, Duration::from_millis(10)).unwrap();
        let token = supervisor.install_signal_handlers().unwrap();
        let runner = counter(usize::MAX, false, &token);

        let watched = token.clone();
        let held = lock.clone();
        let signals = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            raise(Signal::SIGHUP).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            let survived = !watched.is_cancelled() && held.exists();
            raise(Signal::SIGTERM).unwrap();
            survived
        });

        tokio::time::timeout(Duration::from_secs(5), supervisor.run(&runner))
            .await
            .unwrap()
            .unwrap();
        assert!(signals.await.unwrap(), "SIGHUP stopped the daemon");

        assert!(token.is_cancelled());
        assert!(runner.cycles.load(Ordering::SeqCst) > 1);
        assert_eq!(supervisor.state(), DaemonState::Stopped);
        assert!(!lock.exists());
    }
}
