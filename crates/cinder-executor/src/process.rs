//! Subprocess execution.
//!
//! Commands are written as templates with `%s` placeholders. Arguments are
//! substituted after the template has been split into tokens, so an
//! argument always ends up inside exactly one argv entry and is never seen
//! by a shell.

use cinder_core::{LogLevel, LogSink};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors turning a template into an argv vector.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("command template is empty")]
    Empty,

    #[error("unterminated {0} quote in command template")]
    UnterminatedQuote(char),

    #[error("command template expects {expected} argument(s), got {got}")]
    ArgumentCount { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Arg,
}

/// A parsed command template.
///
/// Tokens are separated by whitespace; single or double quotes group a
/// token, `\` escapes the next character outside single quotes, `%s` marks
/// a positional argument and `%%` is a literal percent sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    tokens: Vec<Vec<Piece>>,
    placeholders: usize,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut tokens = Vec::new();
        let mut current: Vec<Piece> = Vec::new();
        let mut text = String::new();
        let mut in_token = false;
        let mut quote: Option<char> = None;
        let mut placeholders = 0;

        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match (quote, c) {
                (None, c) if c.is_whitespace() => {
                    if in_token {
                        flush_text(&mut text, &mut current);
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                (None, '\'' | '"') => {
                    quote = Some(c);
                    in_token = true;
                }
                (Some(q), c) if c == q => quote = None,
                (q, '\\') if q != Some('\'') => {
                    if let Some(next) = chars.next() {
                        text.push(next);
                    }
                    in_token = true;
                }
                (_, '%') => {
                    in_token = true;
                    match chars.peek() {
                        Some('s') => {
                            chars.next();
                            flush_text(&mut text, &mut current);
                            current.push(Piece::Arg);
                            placeholders += 1;
                        }
                        Some('%') => {
                            chars.next();
                            text.push('%');
                        }
                        _ => text.push('%'),
                    }
                }
                (_, c) => {
                    text.push(c);
                    in_token = true;
                }
            }
        }

        if let Some(q) = quote {
            return Err(TemplateError::UnterminatedQuote(q));
        }
        if in_token {
            flush_text(&mut text, &mut current);
            tokens.push(current);
        }
        if tokens.is_empty() {
            return Err(TemplateError::Empty);
        }

        Ok(Self {
            tokens,
            placeholders,
        })
    }

    /// Number of `%s` placeholders.
    pub fn placeholders(&self) -> usize {
        self.placeholders
    }

    /// Substitute `args` and return the argv vector, program first.
    pub fn render<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<String>, TemplateError> {
        if args.len() != self.placeholders {
            return Err(TemplateError::ArgumentCount {
                expected: self.placeholders,
                got: args.len(),
            });
        }

        let mut args = args.iter();
        let argv = self
            .tokens
            .iter()
            .map(|pieces| {
                let mut token = String::new();
                for piece in pieces {
                    match piece {
                        Piece::Text(text) => token.push_str(text),
                        Piece::Arg => {
                            if let Some(arg) = args.next() {
                                token.push_str(arg.as_ref());
                            }
                        }
                    }
                }
                token
            })
            .collect();
        Ok(argv)
    }
}

fn flush_text(text: &mut String, pieces: &mut Vec<Piece>) {
    if !text.is_empty() || pieces.is_empty() {
        pieces.push(Piece::Text(std::mem::take(text)));
    }
}

impl std::str::FromStr for CommandTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One command to run.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub template: String,
    pub args: Vec<String>,
    /// Overrides the runner's working directory.
    pub working_dir: Option<PathBuf>,
    /// Replaces the inherited environment entirely when set.
    pub env: Option<HashMap<String, String>>,
}

impl CommandSpec {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }
}

/// Outcome of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit status was zero.
    pub success: bool,
    /// `None` when the process never started or was killed by a signal.
    pub exit_code: Option<i32>,
    /// Non-empty stdout lines in emission order.
    pub stdout: Vec<String>,
    pub stderr: String,
    /// The run was interrupted by cancellation.
    pub cancelled: bool,
}

impl CommandResult {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            ..Default::default()
        }
    }

    /// Stdout lines joined with `\n`.
    pub fn output(&self) -> String {
        self.stdout.join("\n")
    }
}

/// Runs external commands and reports their results.
///
/// A runner carries the defaults for every command it runs: working
/// directory, environment, log sink and cancellation token. Cloning is
/// cheap.
#[derive(Clone, Default)]
pub struct ProcessRunner {
    working_dir: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
    sink: Option<Arc<dyn LogSink>>,
    verbose: bool,
    log_output: bool,
    cancel: CancellationToken,
}

impl fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("working_dir", &self.working_dir)
            .field("verbose", &self.verbose)
            .field("log_output", &self.log_output)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            log_output: true,
            ..Default::default()
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replace the inherited environment for every command.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Log the output of successful commands too.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Whether stdout is logged at all.
    pub fn log_output(mut self, log_output: bool) -> Self {
        self.log_output = log_output;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `template` with `args` using the runner's defaults.
    pub async fn run<S: AsRef<str>>(&self, template: &str, args: &[S]) -> CommandResult {
        let spec = CommandSpec::new(template).args(args.iter().map(|a| a.as_ref().to_string()));
        self.execute(&spec).await
    }

    /// Run a command. Never fails: spawn errors and cancellation are
    /// reported through the result.
    pub async fn execute(&self, spec: &CommandSpec) -> CommandResult {
        let argv = match CommandTemplate::parse(&spec.template).and_then(|t| t.render(&spec.args)) {
            Ok(argv) => argv,
            Err(e) => {
                let message = format!("invalid command `{}`: {}", spec.template, e);
                self.log(LogLevel::Error, &message);
                return CommandResult::failed(message);
            }
        };

        let result = self.spawn_and_wait(&argv, spec).await;

        let should_log = self.log_output && (self.verbose || !result.success);
        if should_log && !result.stdout.is_empty() {
            let level = if result.success {
                LogLevel::Info
            } else {
                LogLevel::Notice
            };
            self.log(level, &result.output());
        }
        if !result.stderr.is_empty() {
            self.log(LogLevel::Error, &result.stderr);
        }

        result
    }

    async fn spawn_and_wait(&self, argv: &[String], spec: &CommandSpec) -> CommandResult {
        let (program, rest) = match argv.split_first() {
            Some(split) => split,
            None => return CommandResult::failed(TemplateError::Empty.to_string()),
        };
        debug!(command = %argv.join(" "), "Executing");

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so cancellation reaches everything the command forks.
        #[cfg(unix)]
        command.process_group(0);

        if let Some(dir) = spec.working_dir.as_ref().or(self.working_dir.as_ref()) {
            command.current_dir(dir);
        }
        if let Some(env) = spec.env.as_ref().or(self.env.as_ref()) {
            command.env_clear().envs(env);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return CommandResult::failed(format!("failed to run {}: {}", program, e)),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = tokio::select! {
            (status, out, err) = async {
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
            } => Some((status, out, err)),
            () = self.cancel.cancelled() => None,
        };

        let Some((status, out, err)) = finished else {
            warn!(program = %program, "cancellation requested; killing process");
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                kill_group(pid);
            }
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "failed to kill cancelled process");
            }
            let _ = child.wait().await;
            return CommandResult {
                stderr: format!("{} was cancelled", program),
                cancelled: true,
                ..Default::default()
            };
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => return CommandResult::failed(format!("failed to wait for {}: {}", program, e)),
        };

        CommandResult {
            success: status.success(),
            exit_code: status.code(),
            stdout: split_lines(&out),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            cancelled: false,
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        if let Some(sink) = &self.sink {
            sink.log(level, message);
        }
    }
}

/// SIGKILL the process group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, error = %e, "failed to kill process group");
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
