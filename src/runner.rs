//! Asynchronous command execution abstraction.
//!
//! Providers never spawn processes directly; they go through a
//! [`CommandRunner`] so tests can substitute scripted outcomes without
//! touching the host. The production implementation wraps
//! `tokio::process` and suspends the calling task while the child runs.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8Path;
use thiserror::Error;
use tokio::process::Command;

/// Future returned by runner operations.
pub type RunnerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    ///
    /// A missing exit code (abnormal termination, transport hiccup) counts
    /// as failure, never success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors raised when a command cannot be executed at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// A non-zero exit code is a normal, successful return; only a failure
    /// to start the process at all surfaces as [`RunnerError`].
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        cwd: Option<&'a Utf8Path>,
    ) -> RunnerFuture<'a, Result<CommandOutput, RunnerError>>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        cwd: Option<&'a Utf8Path>,
    ) -> RunnerFuture<'a, Result<CommandOutput, RunnerError>> {
        Box::pin(async move {
            let mut command = Command::new(program);
            command.args(args);
            if let Some(dir) = cwd {
                command.current_dir(dir);
            }

            let output = command.output().await.map_err(|err| RunnerError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_exit_code_zero() {
        let zero = CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        let failed = CommandOutput {
            code: Some(3),
            ..zero.clone()
        };
        let missing = CommandOutput {
            code: None,
            ..zero.clone()
        };

        assert!(zero.is_success());
        assert!(!failed.is_success());
        assert!(!missing.is_success());
    }

    #[tokio::test]
    async fn process_runner_reports_spawn_failure() {
        let runner = ProcessCommandRunner;
        let err = runner
            .run("topolab-test-definitely-missing-binary", &[], None)
            .await
            .expect_err("missing binary should fail to spawn");

        let RunnerError::Spawn { program, .. } = err;
        assert_eq!(program, "topolab-test-definitely-missing-binary");
    }
}
