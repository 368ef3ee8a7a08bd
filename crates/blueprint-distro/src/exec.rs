//! External command execution
//!
//! Distribution tools (`kind`, `k0sctl`, `ssh`, `k0s`) are always invoked with
//! an argument vector, never through a local shell. [`CommandRunner`] is the
//! seam tests mock; [`ProcessRunner`] spawns real processes.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use blueprint_common::{Error, Result};

/// A fully specified program invocation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute, resolved through `PATH`
    pub program: String,
    /// Arguments, passed verbatim
    pub args: Vec<String>,
    /// Bytes written to the child's stdin
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    /// Start building an invocation of `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `input` on stdin
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program plus its first argument, used to label errors
    pub fn label(&self) -> String {
        match self.args.first() {
            Some(sub) => format!("{} {}", self.program, sub),
            None => self.program.clone(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Trait for executing external commands (allows mocking in tests)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output.
    ///
    /// A non-zero exit is not an error here; only failing to start the
    /// process is.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs invocations as local child processes
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        trace!(command = %invocation, "exec");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::command(invocation.label(), format!("failed to start: {}", e)))?;

        if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            stdin.write_all(input).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run and require a zero exit status
pub async fn run_checked<R>(runner: &R, invocation: &Invocation) -> Result<CommandOutput>
where
    R: CommandRunner + ?Sized,
{
    let output = runner.run(invocation).await?;
    if output.success() {
        return Ok(output);
    }

    let detail = match output.stderr.trim() {
        "" => format!("exit code {:?}", output.code),
        stderr => stderr.to_string(),
    };
    Err(Error::command(invocation.label(), detail))
}
