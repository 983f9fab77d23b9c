//! Remote execution over a multiplexed SSH connection.
//!
//! The provider drives the system OpenSSH client. The memoized connection
//! is an OpenSSH control master: it is opened lazily on first use behind a
//! mutex (so concurrent first callers trigger exactly one connect), then
//! every command and file transfer multiplexes over the shared master via
//! its control socket. Transfers open a fresh `scp` sub-session per call.
//! The master stays up until [`RuntimeProvider::close`] is called.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    HealthReport, KnownHostsPolicy, ProviderError, ProviderFuture, ProviderKind, ProviderTooling,
    RuntimeProvider, SshProviderConfig, health_from_probes,
};
use crate::runner::{CommandOutput, CommandRunner, RunnerError};
use crate::util::expand_tilde;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectionState {
    Unconnected,
    Connected,
}

/// Executes commands on a remote host over SSH.
#[derive(Debug)]
pub struct SshProvider<R: CommandRunner> {
    config: SshProviderConfig,
    tooling: ProviderTooling,
    runner: R,
    control_path: Utf8PathBuf,
    connection: Mutex<ConnectionState>,
}

impl<R: CommandRunner> SshProvider<R> {
    /// Creates an SSH provider using the supplied runner. No connection is
    /// opened until the first command or transfer.
    #[must_use]
    pub fn new(config: SshProviderConfig, tooling: ProviderTooling, runner: R) -> Self {
        let control_path = control_socket_path(&config.name);
        Self {
            config,
            tooling,
            runner,
            control_path,
            connection: Mutex::new(ConnectionState::Unconnected),
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.username, self.config.host)
    }

    fn uses_password(&self) -> bool {
        self.identity_file().is_none() && self.config.password.is_some()
    }

    fn identity_file(&self) -> Option<String> {
        self.config
            .private_key_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(expand_tilde)
    }

    /// Options shared by every SSH and SCP invocation against this target.
    fn common_options(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-o"),
            OsString::from(format!("ControlPath={}", self.control_path)),
        ];

        match self.config.known_hosts {
            KnownHostsPolicy::Accept => {
                args.push(OsString::from("-o"));
                args.push(OsString::from("StrictHostKeyChecking=no"));
                args.push(OsString::from("-o"));
                args.push(OsString::from("UserKnownHostsFile=/dev/null"));
            }
            KnownHostsPolicy::Strict => {
                args.push(OsString::from("-o"));
                args.push(OsString::from("StrictHostKeyChecking=yes"));
            }
        }

        if let Some(identity) = self.identity_file() {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
            args.push(OsString::from("-i"));
            args.push(OsString::from(identity));
        }

        args
    }

    fn master_args(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-M"),
            OsString::from("-N"),
            OsString::from("-f"),
            OsString::from("-p"),
            OsString::from(self.config.port.to_string()),
        ];
        args.extend(self.common_options());
        args.push(OsString::from(self.destination()));
        args
    }

    fn exec_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.config.port.to_string()),
        ];
        args.extend(self.common_options());
        args.push(OsString::from(self.destination()));
        args.push(OsString::from(remote_command));
        args
    }

    fn transfer_args(&self, from: &str, to: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-P"),
            OsString::from(self.config.port.to_string()),
        ];
        args.extend(self.common_options());
        args.push(OsString::from(from));
        args.push(OsString::from(to));
        args
    }

    fn remote_file_ref(&self, path: &Utf8Path) -> String {
        format!("{}:{path}", self.destination())
    }

    /// Opens the control master if it is not already up. Callers race on
    /// the connection mutex, so only one connect attempt ever runs.
    async fn ensure_connected(&self) -> Result<(), ProviderError> {
        let mut state = self.connection.lock().await;
        if *state == ConnectionState::Connected {
            return Ok(());
        }

        let args = self.master_args();
        let output = if self.uses_password() {
            let mut wrapped = vec![OsString::from("-p")];
            wrapped.push(OsString::from(
                self.config.password.clone().unwrap_or_default(),
            ));
            wrapped.push(OsString::from(self.tooling.ssh_bin.clone()));
            wrapped.extend(args);
            self.run_transport(&self.tooling.sshpass_bin, &wrapped).await?
        } else {
            self.run_transport(&self.tooling.ssh_bin, &args).await?
        };

        if !output.is_success() {
            return Err(ProviderError::Transport {
                message: connect_failure_message(&self.config.host, &output),
            });
        }

        debug!(host = %self.config.host, provider = %self.config.name, "ssh control master established");
        *state = ConnectionState::Connected;
        Ok(())
    }

    async fn run_transport(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ProviderError> {
        self.runner
            .run(program, args, None)
            .await
            .map_err(|err| transport_error(&err))
    }

    async fn transfer(
        &self,
        from: &Utf8Path,
        to: &Utf8Path,
        from_ref: String,
        to_ref: String,
    ) -> Result<(), ProviderError> {
        self.ensure_connected()
            .await
            .map_err(|err| transfer_error(from, to, &err.to_string()))?;

        let args = self.transfer_args(&from_ref, &to_ref);
        let output = self
            .runner
            .run(&self.tooling.scp_bin, &args, None)
            .await
            .map_err(|err| transfer_error(from, to, &err.to_string()))?;

        if output.is_success() {
            Ok(())
        } else {
            Err(transfer_error(from, to, output.stderr.trim()))
        }
    }
}

impl<R: CommandRunner> RuntimeProvider for SshProvider<R> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ssh
    }

    fn execute_command<'a>(
        &'a self,
        command: &'a [String],
        cwd: Option<&'a Utf8Path>,
    ) -> ProviderFuture<'a, Result<CommandOutput, ProviderError>> {
        Box::pin(async move {
            if command.is_empty() {
                return Err(ProviderError::Transport {
                    message: String::from("cannot execute an empty command"),
                });
            }
            self.ensure_connected().await?;

            let remote_command = build_remote_command(command, cwd);
            let args = self.exec_args(&remote_command);
            self.run_transport(&self.tooling.ssh_bin, &args).await
        })
    }

    fn upload_file<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        remote_path: &'a Utf8Path,
    ) -> ProviderFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let to_ref = self.remote_file_ref(remote_path);
            self.transfer(local_path, remote_path, local_path.to_string(), to_ref)
                .await
        })
    }

    fn download_file<'a>(
        &'a self,
        remote_path: &'a Utf8Path,
        local_path: &'a Utf8Path,
    ) -> ProviderFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let from_ref = self.remote_file_ref(remote_path);
            self.transfer(remote_path, local_path, from_ref, local_path.to_string())
                .await
        })
    }

    fn check_health<'a>(&'a self) -> ProviderFuture<'a, HealthReport> {
        Box::pin(health_from_probes(self, &self.tooling))
    }

    fn close<'a>(&'a self) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.connection.lock().await;
            if *state == ConnectionState::Unconnected {
                return;
            }

            let mut args = self.common_options();
            args.push(OsString::from("-O"));
            args.push(OsString::from("exit"));
            args.push(OsString::from(self.destination()));

            match self.runner.run(&self.tooling.ssh_bin, &args, None).await {
                Ok(output) if !output.is_success() => {
                    warn!(
                        provider = %self.config.name,
                        stderr = %output.stderr.trim(),
                        "ssh control master did not exit cleanly"
                    );
                }
                Err(err) => {
                    warn!(provider = %self.config.name, error = %err, "failed to close ssh control master");
                }
                Ok(_) => {}
            }

            *state = ConnectionState::Unconnected;
        })
    }
}

/// Joins an argument list into one shell command string, escaping each
/// argument and prefixing a directory change when `cwd` is given.
fn build_remote_command(command: &[String], cwd: Option<&Utf8Path>) -> String {
    let joined = command
        .iter()
        .map(|arg| escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    let Some(dir) = cwd else {
        return joined;
    };
    format!("cd {} && {joined}", escape(dir.as_str().into()))
}

fn control_socket_path(provider_name: &str) -> Utf8PathBuf {
    let sanitized: String = provider_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect();
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(8);
    Utf8PathBuf::from(format!("/tmp/topolab-{sanitized}-{token}.ctl"))
}

fn connect_failure_message(host: &str, output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("could not connect to {host}")
    } else {
        format!("could not connect to {host}: {stderr}")
    }
}

fn transport_error(err: &RunnerError) -> ProviderError {
    ProviderError::Transport {
        message: err.to_string(),
    }
}

fn transfer_error(from: &Utf8Path, to: &Utf8Path, message: &str) -> ProviderError {
    ProviderError::Transfer {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        message: if message.is_empty() {
            String::from("transfer did not complete")
        } else {
            message.to_owned()
        },
    }
}
