//! Command-line interface definitions for the `topolab` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page. It must stay self-contained: the build script compiles it with
//! only `clap` available.

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `topolab` binary.
#[derive(Debug, Parser)]
#[command(
    name = "topolab",
    about = "Launch and manage network emulation labs on local or remote hosts",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Deploy a topology from a local file or URL.
    #[command(name = "launch", about = "Deploy a topology from a local file or URL")]
    Launch(LaunchCommand),
    /// Destroy a lab and forget it.
    #[command(name = "stop", about = "Destroy a lab and forget it")]
    Stop(StopCommand),
    /// Show the live status of one lab.
    #[command(name = "status", about = "Show the live status of one lab")]
    Status(StatusCommand),
    /// List all registered labs with live status.
    #[command(name = "list", about = "List all registered labs with live status")]
    List,
    /// Manage runtime providers.
    #[command(subcommand, name = "provider", about = "Manage runtime providers")]
    Provider(ProviderCommand),
}

/// Arguments for the `topolab launch` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct LaunchCommand {
    /// Topology definition: a local file path or an http(s) URL.
    pub(crate) reference: String,
    /// Deploy through a specific provider instead of the default.
    #[arg(long, value_name = "NAME")]
    pub(crate) provider: Option<String>,
}

/// Arguments for the `topolab stop` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StopCommand {
    /// Lab identifier returned by `launch`.
    pub(crate) lab_id: String,
    /// Destroy through a specific provider instead of the default.
    #[arg(long, value_name = "NAME")]
    pub(crate) provider: Option<String>,
}

/// Arguments for the `topolab status` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StatusCommand {
    /// Lab identifier returned by `launch`.
    pub(crate) lab_id: String,
}

/// Provider management subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum ProviderCommand {
    /// List configured providers.
    #[command(name = "list", about = "List configured providers")]
    List,
    /// Add a provider.
    #[command(name = "add", about = "Add a provider")]
    Add(AddProviderCommand),
    /// Remove a provider (the default cannot be removed).
    #[command(name = "remove", about = "Remove a provider")]
    Remove {
        /// Provider name to remove.
        name: String,
    },
    /// Promote a provider to be the default.
    #[command(name = "set-default", about = "Promote a provider to be the default")]
    SetDefault {
        /// Provider name to promote.
        name: String,
    },
    /// Probe the health of every provider.
    #[command(name = "health", about = "Probe the health of every provider")]
    Health,
}

/// Arguments for the `topolab provider add` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct AddProviderCommand {
    /// Unique provider name.
    #[arg(long)]
    pub(crate) name: String,
    /// Provider type.
    #[arg(long = "type", value_enum)]
    pub(crate) kind: ProviderTypeArg,
    /// Remote host name or address (ssh only).
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Remote SSH port (ssh only).
    #[arg(long, default_value_t = 22)]
    pub(crate) port: u16,
    /// Remote user to connect as (ssh only).
    #[arg(long)]
    pub(crate) username: Option<String>,
    /// Password credential (ssh only).
    #[arg(long, conflicts_with = "private_key")]
    pub(crate) password: Option<String>,
    /// Path to the SSH private key file (ssh only).
    #[arg(long, value_name = "PATH")]
    pub(crate) private_key: Option<String>,
    /// Host key verification policy (ssh only).
    #[arg(long, value_enum, default_value_t = KnownHostsArg::Accept)]
    pub(crate) known_hosts: KnownHostsArg,
}

/// Provider type accepted on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum ProviderTypeArg {
    /// Run commands directly on this host.
    Local,
    /// Run commands on a remote host over SSH.
    Ssh,
}

/// Host key policy accepted on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum KnownHostsArg {
    /// Accept unseen host keys; keep no known-hosts state.
    Accept,
    /// Enforce strict host key checking.
    Strict,
}
