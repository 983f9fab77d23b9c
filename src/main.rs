//! Binary entry point for the topolab CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use topolab::config::{AppConfig, AppConfigError};
use topolab::factory::{FactoryError, ProviderFactory};
use topolab::orchestrator::{LabOrchestrator, LabSummary, LaunchError, StatusOutcome, StopError};
use topolab::provider::{
    KnownHostsPolicy, LocalProviderConfig, ProviderConfig, SshProviderConfig,
};
use topolab::registry::{LabRegistry, RegistryError};
use topolab::runner::ProcessCommandRunner;
use topolab::topology::TopologyResolver;

mod cli;

use cli::{
    AddProviderCommand, Cli, KnownHostsArg, LaunchCommand, ProviderCommand, ProviderTypeArg,
    StatusCommand, StopCommand,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] AppConfigError),
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Stop(#[from] StopError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("lab not found: {0}")]
    NotFound(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = AppConfig::load_without_cli_args()?;
    match cli {
        Cli::Launch(args) => launch_command(&config, &args).await,
        Cli::Stop(args) => stop_command(&config, &args).await,
        Cli::Status(args) => status_command(&config, &args).await,
        Cli::List => list_command(&config).await,
        Cli::Provider(command) => provider_command(&config, command).await,
    }
}

fn build_orchestrator(
    config: &AppConfig,
) -> Result<LabOrchestrator<ProcessCommandRunner>, CliError> {
    let factory = ProviderFactory::open(config.provider_settings_path(), config.tooling())?;
    Ok(LabOrchestrator::new(
        factory,
        LabRegistry::new(config.registry_path()),
        TopologyResolver::new(config.scratch_dir()),
        config.containerlab_bin.clone(),
        config.remote_stage_path(),
    ))
}

async fn launch_command(config: &AppConfig, args: &LaunchCommand) -> Result<i32, CliError> {
    let orchestrator = build_orchestrator(config)?;
    let result = orchestrator
        .launch(&args.reference, args.provider.as_deref())
        .await;
    orchestrator.shutdown().await;

    let outcome = result?;
    emit(format!(
        "deployed lab {} ({} nodes) as {} on provider {}",
        outcome.name, outcome.node_count, outcome.lab_id, outcome.provider
    ));
    Ok(0)
}

async fn stop_command(config: &AppConfig, args: &StopCommand) -> Result<i32, CliError> {
    let orchestrator = build_orchestrator(config)?;
    let result = orchestrator
        .stop(&args.lab_id, args.provider.as_deref())
        .await;
    orchestrator.shutdown().await;

    let outcome = result?;
    if let Some(warning) = &outcome.destroy_warning {
        writeln!(io::stderr(), "warning: {warning}").ok();
    }
    emit(format!("stopped lab {} ({})", outcome.name, outcome.lab_id));
    Ok(0)
}

async fn status_command(config: &AppConfig, args: &StatusCommand) -> Result<i32, CliError> {
    let orchestrator = build_orchestrator(config)?;
    let status = orchestrator.status(&args.lab_id).await;
    orchestrator.shutdown().await;

    match status {
        StatusOutcome::NotFound { lab_id } => Err(CliError::NotFound(lab_id)),
        StatusOutcome::Found(summary) => {
            emit(render_summary(&summary));
            Ok(0)
        }
    }
}

async fn list_command(config: &AppConfig) -> Result<i32, CliError> {
    let orchestrator = build_orchestrator(config)?;
    let result = orchestrator.list_active().await;
    orchestrator.shutdown().await;

    let labs = result?;
    if labs.is_empty() {
        emit("no active labs");
        return Ok(0);
    }
    for lab in &labs {
        emit(render_summary(lab));
    }
    Ok(0)
}

async fn provider_command(config: &AppConfig, command: ProviderCommand) -> Result<i32, CliError> {
    let mut factory = ProviderFactory::open(config.provider_settings_path(), config.tooling())?;
    let result = run_provider_command(&mut factory, command).await;
    factory.close_all().await;
    result
}

async fn run_provider_command(
    factory: &mut ProviderFactory<ProcessCommandRunner>,
    command: ProviderCommand,
) -> Result<i32, CliError> {
    match command {
        ProviderCommand::List => {
            for summary in factory.list_providers() {
                let default_marker = if summary.is_default { " (default)" } else { "" };
                let enabled = if summary.enabled { "enabled" } else { "disabled" };
                emit(format!(
                    "{}\t{}\t{enabled}{default_marker}",
                    summary.name, summary.kind
                ));
            }
        }
        ProviderCommand::Add(args) => {
            let name = args.name.clone();
            factory.add_provider(provider_config_from_args(args))?;
            emit(format!("added provider {name}"));
        }
        ProviderCommand::Remove { name } => {
            factory.remove_provider(&name)?;
            emit(format!("removed provider {name}"));
        }
        ProviderCommand::SetDefault { name } => {
            factory.set_default_provider(&name)?;
            emit(format!("default provider is now {name}"));
        }
        ProviderCommand::Health => {
            for (name, report) in factory.check_all_providers_health().await {
                let verdict = if report.healthy { "healthy" } else { "unhealthy" };
                let detail = report
                    .error
                    .map_or_else(String::new, |message| format!(" ({message})"));
                emit(format!(
                    "{name}\t{verdict}\tdocker={}\tcontainerlab={}{detail}",
                    report.docker_available, report.containerlab_available
                ));
            }
        }
    }
    Ok(0)
}

fn provider_config_from_args(args: AddProviderCommand) -> ProviderConfig {
    match args.kind {
        ProviderTypeArg::Local => ProviderConfig::Local(LocalProviderConfig {
            name: args.name,
            enabled: true,
        }),
        ProviderTypeArg::Ssh => ProviderConfig::Ssh(SshProviderConfig {
            name: args.name,
            enabled: true,
            host: args.host.unwrap_or_default(),
            port: args.port,
            username: args.username.unwrap_or_default(),
            password: args.password,
            private_key_path: args.private_key,
            known_hosts: match args.known_hosts {
                KnownHostsArg::Accept => KnownHostsPolicy::Accept,
                KnownHostsArg::Strict => KnownHostsPolicy::Strict,
            },
        }),
    }
}

fn render_summary(summary: &LabSummary) -> String {
    format!(
        "{}\t{}\t{}\tnodes={}\tcreated={}",
        summary.lab_id,
        summary.name,
        summary.status,
        summary.node_count,
        summary.created_at.to_rfc3339()
    )
}

fn emit(line: impl AsRef<str>) {
    writeln!(io::stdout(), "{}", line.as_ref()).ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_arguments_map_onto_the_config_variant() {
        let args = AddProviderCommand {
            name: String::from("edge1"),
            kind: ProviderTypeArg::Ssh,
            host: Some(String::from("10.0.0.5")),
            port: 2222,
            username: Some(String::from("ops")),
            password: Some(String::from("x")),
            private_key: None,
            known_hosts: KnownHostsArg::Strict,
        };

        let config = provider_config_from_args(args);
        let ProviderConfig::Ssh(ssh) = config else {
            panic!("expected an ssh config");
        };
        assert_eq!(ssh.host, "10.0.0.5");
        assert_eq!(ssh.port, 2222);
        assert_eq!(ssh.known_hosts, KnownHostsPolicy::Strict);
        assert!(ssh.enabled);
    }

    #[test]
    fn local_arguments_ignore_ssh_fields() {
        let args = AddProviderCommand {
            name: String::from("here"),
            kind: ProviderTypeArg::Local,
            host: None,
            port: 22,
            username: None,
            password: None,
            private_key: None,
            known_hosts: KnownHostsArg::Accept,
        };

        let config = provider_config_from_args(args);
        assert!(matches!(config, ProviderConfig::Local(_)));
        assert_eq!(config.name(), "here");
    }

    #[test]
    fn write_error_renders_the_message() {
        let mut buf = Vec::new();
        let err = CliError::NotFound(String::from("deadbeef"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("lab not found: deadbeef"), "rendered: {rendered}");
    }
}
