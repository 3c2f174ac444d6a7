//! Subprocess seam for toolchain manager and compiler queries.
//!
//! Every blocking interaction with `rustup`/`rustc` goes through a
//! [`CommandRunner`], so the provisioning chain can be driven by canned
//! output in tests and by real processes in the binary.

use std::fmt::Write as _;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;

use crate::env::Environment;

/// Future returned by [`CommandRunner::run`].
pub type RunFut<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput, RunError>> + Send + 'a>>;

/// A fully described subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    /// Replaces the inherited environment when set.
    env: Option<Environment>,
}

impl Invocation {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, env: Environment) -> Self {
        self.env = Some(env);
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    #[must_use]
    pub fn environment(&self) -> Option<&Environment> {
        self.env.as_ref()
    }

    /// Whether the argument list begins with `prefix`.
    #[must_use]
    pub fn has_args_prefix(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len() && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }

    /// Human-readable command line, for logs and error messages.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            let _ = write!(line, " {arg}");
        }
        line
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("`{program}` not found")]
    NotFound { program: String },
    #[error("`{command}` exited with {}: {}", exit_label(.code), .stderr.trim())]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    /// Whether the executable itself could not be located.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("status {code}"),
        None => String::from("a signal"),
    }
}

/// Runs a subprocess to completion and captures its output.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunFut<'a>;
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    async fn run_process(invocation: &Invocation) -> Result<CommandOutput, RunError> {
        let command_line = invocation.command_line();
        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.arg_list())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = invocation.cwd() {
            cmd.current_dir(dir);
        }
        if let Some(env) = invocation.environment() {
            cmd.env_clear().envs(env.iter());
        }

        tracing::debug!(command = %command_line, "Running");
        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(command = %command_line, "Executable not found");
                return Err(RunError::NotFound {
                    program: invocation.program().to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(command = %command_line, error = %e, "Failed to run");
                return Err(RunError::Io {
                    command: command_line,
                    source: e,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            tracing::warn!(
                command = %command_line,
                code = ?output.status.code(),
                stdout = %stdout,
                stderr = %stderr,
                "Command failed"
            );
            return Err(RunError::Failed {
                command: command_line,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

impl CommandRunner for ProcessRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunFut<'a> {
        Box::pin(Self::run_process(invocation))
    }
}
