//! Core library for the topolab lab orchestration tool.
//!
//! The crate exposes a runtime provider abstraction over local and
//! SSH execution targets, a factory that owns the configured provider
//! set, and an orchestrator that drives the lab lifecycle
//! (launch → status → stop) against those targets.

pub mod config;
pub mod factory;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod runner;
pub mod test_support;
pub mod topology;
pub mod util;

pub use config::{AppConfig, AppConfigError};
pub use factory::{
    DEFAULT_PROVIDER_NAME, FactoryError, ProviderFactory, ProviderSettings, ProviderSummary,
};
pub use orchestrator::{
    LabOrchestrator, LabStatus, LabSummary, LaunchError, LaunchOutcome, StatusOutcome, StopError,
    StopOutcome,
};
pub use provider::{
    HealthReport, KnownHostsPolicy, LocalProvider, LocalProviderConfig, ProviderConfig,
    ProviderConfigError, ProviderError, ProviderKind, ProviderTooling, RuntimeProvider,
    SshProvider, SshProviderConfig,
};
pub use registry::{LabRecord, LabRegistry, RegistryError, generate_lab_id};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
pub use topology::{
    ParsedTopology, ResolvedTopology, TopologyDefinition, TopologyError, TopologyResolver,
    derive_lab_name, node_count_from_config, parse_topology,
};
pub use util::expand_tilde;
