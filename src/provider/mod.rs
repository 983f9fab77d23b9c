//! Runtime provider abstraction for executing topology tooling.
//!
//! A [`RuntimeProvider`] answers one question: where and how do commands
//! and files land when a lab is deployed. Two variants exist — direct
//! local execution and remote execution over a multiplexed SSH
//! connection. Callers receive one uniform surface: command results carry
//! the tool's exit status verbatim, while transport problems (unreachable
//! host, unspawnable process, failed copy) surface as typed
//! [`ProviderError`] values and never as raw I/O errors.

use std::future::Future;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;

mod config;
mod local;
mod ssh;

pub use config::{
    DEFAULT_SSH_PORT, KnownHostsPolicy, LocalProviderConfig, ProviderConfig, ProviderConfigError,
    ProviderKind, SshProviderConfig,
};
pub use local::LocalProvider;
pub use ssh::SshProvider;

use crate::runner::CommandOutput;

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Host-side tool binaries shared by all providers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderTooling {
    /// Topology deploy/destroy/inspect binary.
    pub containerlab_bin: String,
    /// Container runtime binary used for health probes.
    pub docker_bin: String,
    /// SSH client binary.
    pub ssh_bin: String,
    /// SSH file copy binary.
    pub scp_bin: String,
    /// Password helper binary used when an SSH target authenticates with a
    /// password instead of a key.
    pub sshpass_bin: String,
}

impl Default for ProviderTooling {
    fn default() -> Self {
        Self {
            containerlab_bin: String::from("containerlab"),
            docker_bin: String::from("docker"),
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            sshpass_bin: String::from("sshpass"),
        }
    }
}

/// Outcome of probing a provider's deploy capabilities.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HealthReport {
    /// True exactly when both tool probes succeeded.
    pub healthy: bool,
    /// Whether the container runtime responded to its version probe.
    pub docker_available: bool,
    /// Whether the topology tool responded to its version probe.
    pub containerlab_available: bool,
    /// First transport error encountered while probing, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    /// Builds a report for a provider that could not be probed at all.
    #[must_use]
    pub const fn unreachable(message: String) -> Self {
        Self {
            healthy: false,
            docker_available: false,
            containerlab_available: false,
            error: Some(message),
        }
    }
}

/// Errors raised at the provider boundary.
///
/// A command that runs and exits non-zero is not an error — its
/// [`CommandOutput`] carries the status. These variants cover the cases
/// where the transport itself failed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when the command could not be executed at all: the process
    /// failed to spawn or the remote host could not be reached.
    #[error("transport failure: {message}")]
    Transport {
        /// Human-readable description of the failure.
        message: String,
    },
    /// Raised when a file transfer did not complete. Transfers are
    /// all-or-nothing; a failed transfer must be retried wholesale.
    #[error("file transfer from {from} to {to} failed: {message}")]
    Transfer {
        /// Source path of the attempted transfer.
        from: Utf8PathBuf,
        /// Destination path of the attempted transfer.
        to: Utf8PathBuf,
        /// Human-readable description of the failure.
        message: String,
    },
}

/// Capability interface over one execution target.
pub trait RuntimeProvider: Send + Sync + std::fmt::Debug {
    /// Returns the configured provider name.
    fn name(&self) -> &str;

    /// Returns the implementation variant.
    fn kind(&self) -> ProviderKind;

    /// Executes `command` (program plus arguments) on the target,
    /// capturing exit status, stdout, and stderr. When `cwd` is given the
    /// command runs with that working directory.
    fn execute_command<'a>(
        &'a self,
        command: &'a [String],
        cwd: Option<&'a Utf8Path>,
    ) -> ProviderFuture<'a, Result<CommandOutput, ProviderError>>;

    /// Copies a local file onto the target.
    fn upload_file<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        remote_path: &'a Utf8Path,
    ) -> ProviderFuture<'a, Result<(), ProviderError>>;

    /// Copies a file from the target to a local path.
    fn download_file<'a>(
        &'a self,
        remote_path: &'a Utf8Path,
        local_path: &'a Utf8Path,
    ) -> ProviderFuture<'a, Result<(), ProviderError>>;

    /// Probes the target's deploy capabilities. Health is derived by
    /// running the tools' version subcommands, never cached.
    fn check_health<'a>(&'a self) -> ProviderFuture<'a, HealthReport>;

    /// Releases any live connection held by the provider. Idempotent and
    /// safe to call when no connection was ever opened.
    fn close<'a>(&'a self) -> ProviderFuture<'a, ()>;
}

/// Runs the shared docker/containerlab probes through a provider's own
/// command channel and folds the outcome into a [`HealthReport`].
pub(crate) async fn health_from_probes<P: RuntimeProvider + ?Sized>(
    provider: &P,
    tooling: &ProviderTooling,
) -> HealthReport {
    let mut error = None;
    let docker_available =
        probe_tool(provider, &tooling.docker_bin, &mut error).await;
    let containerlab_available =
        probe_tool(provider, &tooling.containerlab_bin, &mut error).await;

    HealthReport {
        healthy: docker_available && containerlab_available,
        docker_available,
        containerlab_available,
        error,
    }
}

async fn probe_tool<P: RuntimeProvider + ?Sized>(
    provider: &P,
    tool_bin: &str,
    error: &mut Option<String>,
) -> bool {
    let command = [tool_bin.to_owned(), String::from("version")];
    match provider.execute_command(&command, None).await {
        Ok(output) => output.is_success(),
        Err(err) => {
            error.get_or_insert_with(|| err.to_string());
            false
        }
    }
}

#[cfg(test)]
mod tests;
