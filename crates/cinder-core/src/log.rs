//! Per-build log sink.
//!
//! Everything a pipeline run reports about a build ends up in two places:
//! the build's own log text (filtered by the build's verbosity) and the
//! process-wide `tracing` output (unfiltered, tagged with the build id).

use std::fmt;
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::BuildId;

/// Severity of a build log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Anything that accepts build log messages.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

#[derive(Debug)]
struct LoggerState {
    min_level: LogLevel,
    buffer: String,
}

/// Log sink bound to a single build.
///
/// Accepted lines are buffered until the pipeline drains them into
/// [`crate::Build::log`] at its next persistence point.
#[derive(Debug)]
pub struct BuildLogger {
    build_id: BuildId,
    state: Mutex<LoggerState>,
}

impl BuildLogger {
    /// A logger that keeps notices and above.
    pub fn new(build_id: BuildId) -> Self {
        Self {
            build_id,
            state: Mutex::new(LoggerState {
                min_level: LogLevel::Notice,
                buffer: String::new(),
            }),
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LoggerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_level(&self, level: LogLevel) {
        self.state().min_level = level;
    }

    pub fn level(&self) -> LogLevel {
        self.state().min_level
    }

    /// Verbose builds record informational output as well.
    pub fn set_verbose(&self, verbose: bool) {
        self.set_level(if verbose {
            LogLevel::Info
        } else {
            LogLevel::Notice
        });
    }

    pub fn notice(&self, message: &str) {
        self.log(LogLevel::Notice, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn failure(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Take everything buffered since the last drain.
    pub fn drain(&self) -> String {
        std::mem::take(&mut self.state().buffer)
    }

    /// Copy of the buffered text, leaving it in place.
    pub fn contents(&self) -> String {
        self.state().buffer.clone()
    }
}

impl LogSink for BuildLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let build_id = self.build_id.get();
        match level {
            LogLevel::Debug => debug!(build_id, "{}", message),
            LogLevel::Info | LogLevel::Notice => info!(build_id, "{}", message),
            LogLevel::Warning => warn!(build_id, "{}", message),
            LogLevel::Error => error!(build_id, "{}", message),
        }

        let mut state = self.state();
        if level < state.min_level {
            return;
        }
        state.buffer.push_str(message);
        if !message.ends_with('\n') {
            state.buffer.push('\n');
        }
    }
}
