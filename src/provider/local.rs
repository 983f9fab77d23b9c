//! Direct child-process execution on this host.

use std::ffi::OsString;

use camino::Utf8Path;

use super::{
    HealthReport, LocalProviderConfig, ProviderError, ProviderFuture, ProviderKind,
    ProviderTooling, RuntimeProvider, health_from_probes,
};
use crate::runner::{CommandOutput, CommandRunner, ProcessCommandRunner};

/// Executes commands as direct children of the current process.
///
/// Uploads and downloads degenerate to same-filesystem copies: both sides
/// of a "transfer" are paths on this host.
#[derive(Clone, Debug)]
pub struct LocalProvider<R: CommandRunner> {
    config: LocalProviderConfig,
    tooling: ProviderTooling,
    runner: R,
}

impl LocalProvider<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub const fn with_process_runner(config: LocalProviderConfig, tooling: ProviderTooling) -> Self {
        Self::new(config, tooling, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> LocalProvider<R> {
    /// Creates a local provider using the supplied runner.
    #[must_use]
    pub const fn new(config: LocalProviderConfig, tooling: ProviderTooling, runner: R) -> Self {
        Self {
            config,
            tooling,
            runner,
        }
    }

    async fn copy_file(
        &self,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), ProviderError> {
        tokio::fs::copy(from, to)
            .await
            .map_err(|err| ProviderError::Transfer {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(())
    }
}

impl<R: CommandRunner> RuntimeProvider for LocalProvider<R> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn execute_command<'a>(
        &'a self,
        command: &'a [String],
        cwd: Option<&'a Utf8Path>,
    ) -> ProviderFuture<'a, Result<CommandOutput, ProviderError>> {
        Box::pin(async move {
            let Some((program, rest)) = command.split_first() else {
                return Err(ProviderError::Transport {
                    message: String::from("cannot execute an empty command"),
                });
            };
            let args: Vec<OsString> = rest.iter().map(OsString::from).collect();
            self.runner
                .run(program, &args, cwd)
                .await
                .map_err(|err| ProviderError::Transport {
                    message: err.to_string(),
                })
        })
    }

    fn upload_file<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        remote_path: &'a Utf8Path,
    ) -> ProviderFuture<'a, Result<(), ProviderError>> {
        Box::pin(self.copy_file(local_path, remote_path))
    }

    fn download_file<'a>(
        &'a self,
        remote_path: &'a Utf8Path,
        local_path: &'a Utf8Path,
    ) -> ProviderFuture<'a, Result<(), ProviderError>> {
        Box::pin(self.copy_file(remote_path, local_path))
    }

    fn check_health<'a>(&'a self) -> ProviderFuture<'a, HealthReport> {
        Box::pin(health_from_probes(self, &self.tooling))
    }

    fn close<'a>(&'a self) -> ProviderFuture<'a, ()> {
        Box::pin(std::future::ready(()))
    }
}
