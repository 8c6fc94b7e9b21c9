//! Subprocess execution for control plane calls.
//!
//! Every remote operation is an invocation of an external CLI (`az`, `azcopy`,
//! `curl`). `CommandRunner` is the seam between the typed control plane and
//! the process table, so tests can record or script command lines.

use async_trait::async_trait;
use cvmdeploy_shared::errors::{DeployError, DeployResult};
use std::fmt;
use std::process::Stdio;

const REDACTED: &str = "<redacted>";

/// A single external command invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct CliCommand {
    program: String,
    args: Vec<String>,
    /// Indices into `args` that must never be printed.
    secret_args: Vec<usize>,
    /// Inherit stdout/stderr instead of capturing them.
    stream: bool,
}

impl CliCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret_args: Vec::new(),
            stream: false,
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

    /// Add an argument that is passed to the process but redacted from logs
    /// and error messages.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn stream_output(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn raw_args(&self) -> &[String] {
        &self.args
    }

    pub fn is_streamed(&self) -> bool {
        self.stream
    }

    /// Arguments with secrets replaced, suitable for logging.
    pub fn display_args(&self) -> Vec<&str> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                if self.secret_args.contains(&i) {
                    REDACTED
                } else {
                    a.as_str()
                }
            })
            .collect()
    }

    /// Value following `flag`, if present (test and diagnostics helper).
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for CliCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.display_args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CliCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliCommand")
            .field("command", &self.to_string())
            .field("stream", &self.stream)
            .finish()
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
        }
    }

    /// Stdout with surrounding whitespace removed (`-o tsv` values).
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion. A non-zero exit is an error.
    async fn run(&self, cmd: &CliCommand) -> DeployResult<CommandOutput>;
}

/// Runs commands as real child processes on the tokio runtime.
///
/// Children are killed if the awaiting future is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &CliCommand) -> DeployResult<CommandOutput> {
        tracing::debug!(command = %cmd, "Running command");

        let mut command = tokio::process::Command::new(cmd.program());
        command
            .args(cmd.raw_args())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if cmd.is_streamed() {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            let status = command
                .status()
                .await
                .map_err(|e| spawn_error(cmd, e))?;
            if !status.success() {
                return Err(DeployError::CommandFailed {
                    command: cmd.to_string(),
                    status: status.code(),
                    stderr: "see command output above".to_string(),
                });
            }
            return Ok(CommandOutput::default());
        }

        let output = command.output().await.map_err(|e| spawn_error(cmd, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::info!(command = %cmd, error = %stderr, "Command failed");
            return Err(DeployError::CommandFailed {
                command: cmd.to_string(),
                status: output.status.code(),
                stderr,
            });
        }

        Ok(CommandOutput::new(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }
}

fn spawn_error(cmd: &CliCommand, e: std::io::Error) -> DeployError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeployError::MissingTools(vec![cmd.program().to_string()])
    } else {
        DeployError::Internal(format!("failed to spawn `{}`: {}", cmd.program(), e))
    }
}
