//! Lab lifecycle orchestration: launch, stop, status, and listing.
//!
//! The orchestrator wires a provider factory, the lab registry, and the
//! topology resolver into the deploy workflow. Within one call the steps
//! are strictly sequential: resolution, capability probe, staging, deploy,
//! registry write. A lab exists in the registry exactly when its deploy
//! call succeeded.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::factory::ProviderFactory;
use crate::provider::{ProviderError, ProviderKind, RuntimeProvider};
use crate::registry::{LabRecord, LabRegistry, RegistryError, generate_lab_id};
use crate::runner::CommandRunner;
use crate::topology::{
    ResolvedTopology, TopologyError, TopologyResolver, derive_lab_name, node_count_from_config,
};

/// Live verdict for a launched lab.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    /// The external tool reports the topology as deployed.
    Running,
    /// The external tool does not report the topology.
    Stopped,
    /// The external tool could not be queried.
    Unknown,
}

impl std::fmt::Display for LabStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => formatter.write_str("running"),
            Self::Stopped => formatter.write_str("stopped"),
            Self::Unknown => formatter.write_str("unknown"),
        }
    }
}

/// Successful launch result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchOutcome {
    /// Generated identifier used for later stop/status calls.
    pub lab_id: String,
    /// Topology name derived from the definition.
    pub name: String,
    /// Provider the lab was deployed through.
    pub provider: String,
    /// Number of nodes in the deployed topology.
    pub node_count: usize,
}

/// Successful stop result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StopOutcome {
    /// Identifier of the stopped lab.
    pub lab_id: String,
    /// Topology name of the stopped lab.
    pub name: String,
    /// Present when the destroy command failed; the registry entry is
    /// removed regardless.
    pub destroy_warning: Option<String>,
}

/// Status answer for one lab. Status queries never fail; problems fold
/// into [`LabStatus::Unknown`].
#[derive(Clone, Debug, PartialEq)]
pub enum StatusOutcome {
    /// No registry entry carries this identifier.
    NotFound {
        /// Identifier that was requested.
        lab_id: String,
    },
    /// The lab is registered; `status` carries the live verdict.
    Found(LabSummary),
}

/// One row of [`LabOrchestrator::list_active`] output.
#[derive(Clone, Debug, PartialEq)]
pub struct LabSummary {
    /// Generated lab identifier.
    pub lab_id: String,
    /// Topology name.
    pub name: String,
    /// Live verdict from the external tool.
    pub status: LabStatus,
    /// When the lab was launched.
    pub created_at: DateTime<Utc>,
    /// Number of nodes in the stored definition.
    pub node_count: usize,
}

/// Errors surfaced by [`LabOrchestrator::launch`].
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Raised when the reference cannot be resolved or parsed.
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// Raised when no default provider is configured.
    #[error("no runtime provider is configured")]
    NoProvider,
    /// Raised when an explicitly requested provider does not exist.
    #[error("unknown provider: {name}")]
    UnknownProvider {
        /// Requested provider name.
        name: String,
    },
    /// Raised when the deploy tool is not reachable on the provider.
    #[error("containerlab is not available on provider {provider}")]
    ToolUnavailable {
        /// Provider whose capability probe failed.
        provider: String,
    },
    /// Raised when staging the definition to a remote provider fails.
    #[error("failed to stage {path} to provider {provider}")]
    Staging {
        /// Local file that could not be staged.
        path: Utf8PathBuf,
        /// Provider that rejected the transfer.
        provider: String,
        /// Underlying transfer failure.
        #[source]
        source: ProviderError,
    },
    /// Raised when the deploy transport fails outright.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Raised when the deploy command exits non-zero.
    #[error("deploy failed with status {status_text}: {stderr}")]
    Deploy {
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the deploy tool.
        stderr: String,
    },
    /// Raised when the registry write fails after a successful deploy.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors surfaced by [`LabOrchestrator::stop`].
#[derive(Debug, Error)]
pub enum StopError {
    /// Raised when no registry entry carries the identifier.
    #[error("lab not found: {lab_id}")]
    NotFound {
        /// Identifier that was requested.
        lab_id: String,
    },
    /// Raised when the file used at deploy time no longer exists. Without
    /// it there is no reliable way to identify the topology to the
    /// external tool, so the record is kept.
    #[error("original topology file no longer exists: {path}")]
    OriginalFileMissing {
        /// Path recorded at launch time.
        path: Utf8PathBuf,
    },
    /// Raised when no default provider is configured.
    #[error("no runtime provider is configured")]
    NoProvider,
    /// Raised when an explicitly requested provider does not exist.
    #[error("unknown provider: {name}")]
    UnknownProvider {
        /// Requested provider name.
        name: String,
    },
    /// Raised when the registry cannot be read or rewritten.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Coordinates the lab lifecycle against the configured providers.
#[derive(Debug)]
pub struct LabOrchestrator<R: CommandRunner> {
    factory: ProviderFactory<R>,
    registry: LabRegistry,
    resolver: TopologyResolver,
    containerlab_bin: String,
    remote_stage_dir: Utf8PathBuf,
}

impl<R: CommandRunner + Clone + 'static> LabOrchestrator<R> {
    /// Creates an orchestrator owning the given factory and registry.
    #[must_use]
    pub fn new(
        factory: ProviderFactory<R>,
        registry: LabRegistry,
        resolver: TopologyResolver,
        containerlab_bin: String,
        remote_stage_dir: Utf8PathBuf,
    ) -> Self {
        Self {
            factory,
            registry,
            resolver,
            containerlab_bin,
            remote_stage_dir,
        }
    }

    /// Returns the provider factory.
    #[must_use]
    pub const fn factory(&self) -> &ProviderFactory<R> {
        &self.factory
    }

    /// Returns the provider factory for mutation.
    pub const fn factory_mut(&mut self) -> &mut ProviderFactory<R> {
        &mut self.factory
    }

    /// Deploys the topology behind `reference` and registers the lab.
    ///
    /// Every step is terminal on failure and nothing is registered until
    /// the deploy command has succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when resolution, provider lookup, the
    /// capability probe, staging, the deploy command, or the registry
    /// write fails.
    pub async fn launch(
        &self,
        reference: &str,
        provider_name: Option<&str>,
    ) -> Result<LaunchOutcome, LaunchError> {
        let resolved = self.resolver.resolve(reference).await?;
        let name = derive_lab_name(&resolved.parsed.definition, &resolved.file_name);
        let lab_id = generate_lab_id();

        let provider = self
            .resolve_provider(provider_name)
            .map_err(|err| match err {
                ProviderLookupError::NoDefault => LaunchError::NoProvider,
                ProviderLookupError::Unknown { name: requested } => {
                    LaunchError::UnknownProvider { name: requested }
                }
            })?;

        if !self.containerlab_available(provider.as_ref()).await {
            return Err(LaunchError::ToolUnavailable {
                provider: provider.name().to_owned(),
            });
        }

        let deploy_path = self.stage_if_remote(provider.as_ref(), &resolved).await?;
        let command = self.tool_command(&["deploy", "-t", deploy_path.as_str()]);
        let output = provider.execute_command(&command, None).await?;
        if !output.is_success() {
            return Err(LaunchError::Deploy {
                status: output.code,
                status_text: status_text(output.code),
                stderr: output.stderr.trim().to_owned(),
            });
        }

        let record = LabRecord {
            name: name.clone(),
            original_file: resolved.path.clone(),
            status: String::from("running"),
            created_at: Utc::now(),
            config: resolved.parsed.raw.clone(),
        };
        self.registry.insert(&lab_id, record).await?;
        info!(lab_id = %lab_id, name = %name, provider = provider.name(), "lab deployed");

        Ok(LaunchOutcome {
            lab_id,
            name,
            provider: provider.name().to_owned(),
            node_count: resolved.parsed.definition.node_count(),
        })
    }

    /// Destroys the lab and forgets its registry entry.
    ///
    /// The entry is removed even when the destroy command itself fails;
    /// the failure is logged and echoed in the outcome's warning instead
    /// of failing the operation. Only a missing original file aborts the
    /// stop, because the tool cannot be told which topology to destroy
    /// without it.
    ///
    /// # Errors
    ///
    /// Returns [`StopError`] when the lab is unknown, the original file
    /// is gone, no provider resolves, or the registry cannot be updated.
    pub async fn stop(
        &self,
        lab_id: &str,
        provider_name: Option<&str>,
    ) -> Result<StopOutcome, StopError> {
        let Some(record) = self.registry.get(lab_id).await? else {
            return Err(StopError::NotFound {
                lab_id: lab_id.to_owned(),
            });
        };

        if !record.original_file.is_file() {
            return Err(StopError::OriginalFileMissing {
                path: record.original_file,
            });
        }

        let provider = self
            .resolve_provider(provider_name)
            .map_err(|err| match err {
                ProviderLookupError::NoDefault => StopError::NoProvider,
                ProviderLookupError::Unknown { name: requested } => {
                    StopError::UnknownProvider { name: requested }
                }
            })?;

        let destroy_path = self
            .restage_for_destroy(provider.as_ref(), &record.original_file)
            .await;
        let command = self.tool_command(&["destroy", "-t", destroy_path.as_str()]);
        let destroy_warning = match provider.execute_command(&command, None).await {
            Ok(output) if output.is_success() => None,
            Ok(output) => {
                let message = format!(
                    "destroy exited with status {}: {}",
                    status_text(output.code),
                    output.stderr.trim()
                );
                warn!(lab_id, name = %record.name, %message, "destroy command failed; removing registry entry anyway");
                Some(message)
            }
            Err(err) => {
                warn!(lab_id, name = %record.name, error = %err, "destroy transport failed; removing registry entry anyway");
                Some(err.to_string())
            }
        };

        self.registry.remove(lab_id).await?;
        info!(lab_id, name = %record.name, "lab forgotten");

        Ok(StopOutcome {
            lab_id: lab_id.to_owned(),
            name: record.name,
            destroy_warning,
        })
    }

    /// Reports the live status of one lab. Never fails: lookup problems
    /// yield [`StatusOutcome::NotFound`] and tool-query problems yield
    /// [`LabStatus::Unknown`].
    pub async fn status(&self, lab_id: &str) -> StatusOutcome {
        let record = match self.registry.get(lab_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return StatusOutcome::NotFound {
                    lab_id: lab_id.to_owned(),
                };
            }
            Err(err) => {
                warn!(lab_id, error = %err, "registry read failed during status query");
                return StatusOutcome::NotFound {
                    lab_id: lab_id.to_owned(),
                };
            }
        };

        let status = self.live_status(&record.name).await;
        StatusOutcome::Found(LabSummary {
            lab_id: lab_id.to_owned(),
            name: record.name,
            status,
            created_at: record.created_at,
            node_count: node_count_from_config(&record.config),
        })
    }

    /// Lists every registered lab with its live status and node count.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry cannot be read.
    pub async fn list_active(&self) -> Result<Vec<LabSummary>, RegistryError> {
        let entries = self.registry.entries().await?;
        let mut summaries = Vec::with_capacity(entries.len());
        for (lab_id, record) in entries {
            let status = self.live_status(&record.name).await;
            summaries.push(LabSummary {
                lab_id,
                name: record.name,
                status,
                created_at: record.created_at,
                node_count: node_count_from_config(&record.config),
            });
        }
        Ok(summaries)
    }

    /// Closes every live provider connection.
    pub async fn shutdown(&self) {
        self.factory.close_all().await;
    }

    fn resolve_provider(
        &self,
        provider_name: Option<&str>,
    ) -> Result<Arc<dyn RuntimeProvider>, ProviderLookupError> {
        match provider_name {
            Some(requested) => {
                self.factory
                    .get_provider(Some(requested))
                    .ok_or_else(|| ProviderLookupError::Unknown {
                        name: requested.to_owned(),
                    })
            }
            None => self
                .factory
                .get_provider(None)
                .ok_or(ProviderLookupError::NoDefault),
        }
    }

    async fn containerlab_available(&self, provider: &dyn RuntimeProvider) -> bool {
        let command = self.tool_command(&["version"]);
        match provider.execute_command(&command, None).await {
            Ok(output) => output.is_success(),
            Err(_) => false,
        }
    }

    async fn stage_if_remote(
        &self,
        provider: &dyn RuntimeProvider,
        resolved: &ResolvedTopology,
    ) -> Result<Utf8PathBuf, LaunchError> {
        if provider.kind() == ProviderKind::Local {
            return Ok(resolved.path.clone());
        }

        let staged = self.remote_stage_dir.join(&resolved.file_name);
        provider
            .upload_file(&resolved.path, &staged)
            .await
            .map_err(|err| LaunchError::Staging {
                path: resolved.path.clone(),
                provider: provider.name().to_owned(),
                source: err,
            })?;
        Ok(staged)
    }

    /// Best-effort restage before destroy. The upload may fail without
    /// blocking the destroy attempt: the copy staged at launch time may
    /// still be present on the remote host.
    async fn restage_for_destroy(
        &self,
        provider: &dyn RuntimeProvider,
        original_file: &Utf8Path,
    ) -> Utf8PathBuf {
        if provider.kind() == ProviderKind::Local {
            return original_file.to_path_buf();
        }

        let file_name = original_file.file_name().unwrap_or("topology.clab.yml");
        let staged = self.remote_stage_dir.join(file_name);
        if let Err(err) = provider.upload_file(original_file, &staged).await {
            warn!(
                path = %original_file,
                provider = provider.name(),
                error = %err,
                "restaging before destroy failed; relying on the launch-time copy"
            );
        }
        staged
    }

    async fn live_status(&self, name: &str) -> LabStatus {
        let Some(provider) = self.factory.get_provider(None) else {
            return LabStatus::Unknown;
        };

        let command = self.tool_command(&["inspect", "--name", name]);
        match provider.execute_command(&command, None).await {
            Ok(output) if output.is_success() => LabStatus::Running,
            Ok(_) => LabStatus::Stopped,
            Err(err) => {
                warn!(name, error = %err, "status query failed");
                LabStatus::Unknown
            }
        }
    }

    fn tool_command(&self, args: &[&str]) -> Vec<String> {
        let mut command = Vec::with_capacity(args.len() + 1);
        command.push(self.containerlab_bin.clone());
        command.extend(args.iter().map(|arg| (*arg).to_owned()));
        command
    }
}

#[derive(Debug)]
enum ProviderLookupError {
    NoDefault,
    Unknown { name: String },
}

fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}
