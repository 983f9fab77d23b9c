//! Provider factory: the single source of truth for configured execution
//! targets.
//!
//! The factory owns the provider-name → instance map and the persisted
//! settings document. Every mutation rewrites the whole document — there
//! is no partial patching and no cross-process coordination; the factory
//! is process-local state.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::provider::{
    HealthReport, LocalProvider, LocalProviderConfig, ProviderConfig, ProviderConfigError,
    ProviderKind, ProviderTooling, RuntimeProvider, SshProvider,
};
use crate::runner::{CommandRunner, ProcessCommandRunner};

/// Name given to the provider bootstrapped on first run.
pub const DEFAULT_PROVIDER_NAME: &str = "local";

/// Persisted settings document: the default pointer plus every configured
/// provider, keyed by name.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProviderSettings {
    /// Name of the provider used when callers do not specify one.
    pub default_provider: String,
    /// All configured providers keyed by their unique name.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderSettings {
    fn bootstrap() -> Self {
        let local = ProviderConfig::Local(LocalProviderConfig {
            name: String::from(DEFAULT_PROVIDER_NAME),
            enabled: true,
        });
        let mut providers = BTreeMap::new();
        providers.insert(String::from(DEFAULT_PROVIDER_NAME), local);
        Self {
            default_provider: String::from(DEFAULT_PROVIDER_NAME),
            providers,
        }
    }
}

/// One row of [`ProviderFactory::list_providers`] output.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProviderSummary {
    /// Provider name.
    pub name: String,
    /// Implementation variant.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Whether the provider is instantiated.
    pub enabled: bool,
    /// Whether this provider is the current default.
    pub is_default: bool,
}

/// Errors raised by factory operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FactoryError {
    /// Raised when adding a provider under a name that already exists.
    #[error("provider {name} already exists")]
    DuplicateProvider {
        /// Conflicting provider name.
        name: String,
    },
    /// Raised when an operation names a provider that is not configured.
    #[error("unknown provider: {name}")]
    UnknownProvider {
        /// Requested provider name.
        name: String,
    },
    /// Raised when removal targets the current default provider.
    #[error("cannot remove the default provider {name}; set another default first")]
    RemoveDefault {
        /// Provider that is currently the default.
        name: String,
    },
    /// Raised when a provider descriptor fails validation.
    #[error(transparent)]
    Config(#[from] ProviderConfigError),
    /// Raised when the settings document cannot be accessed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the settings document cannot be parsed or rendered.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Loads, instantiates, and mutates the configured providers.
#[derive(Debug)]
pub struct ProviderFactory<R: CommandRunner> {
    settings_path: Utf8PathBuf,
    tooling: ProviderTooling,
    runner: R,
    settings: ProviderSettings,
    providers: HashMap<String, Arc<dyn RuntimeProvider>>,
}

impl ProviderFactory<ProcessCommandRunner> {
    /// Opens the factory with the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError`] when the settings document cannot be read,
    /// written, or contains an invalid provider descriptor.
    pub fn open(
        settings_path: Utf8PathBuf,
        tooling: ProviderTooling,
    ) -> Result<Self, FactoryError> {
        Self::with_runner(settings_path, tooling, ProcessCommandRunner)
    }
}

impl<R: CommandRunner + Clone + 'static> ProviderFactory<R> {
    /// Opens the factory, bootstrapping a default `local` provider when no
    /// settings document exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError`] when the settings document cannot be read,
    /// written, or contains an invalid provider descriptor.
    pub fn with_runner(
        settings_path: Utf8PathBuf,
        tooling: ProviderTooling,
        runner: R,
    ) -> Result<Self, FactoryError> {
        let settings = match read_settings(&settings_path)? {
            Some(existing) => existing,
            None => {
                let bootstrapped = ProviderSettings::bootstrap();
                write_settings(&settings_path, &bootstrapped)?;
                debug!(path = %settings_path, "bootstrapped default provider settings");
                bootstrapped
            }
        };

        let mut factory = Self {
            settings_path,
            tooling,
            runner,
            settings,
            providers: HashMap::new(),
        };
        factory.instantiate_enabled()?;
        Ok(factory)
    }

    /// Returns the name of the current default provider.
    #[must_use]
    pub fn default_provider_name(&self) -> &str {
        &self.settings.default_provider
    }

    /// Returns the provider registered under `name`, or the default
    /// provider when `name` is omitted. Yields `None` for unknown names
    /// and for a dangling default pointer.
    #[must_use]
    pub fn get_provider(&self, name: Option<&str>) -> Option<Arc<dyn RuntimeProvider>> {
        let key = name.unwrap_or(&self.settings.default_provider);
        self.providers.get(key).cloned()
    }

    /// Adds a provider, instantiates it, and persists the settings.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError`] when the descriptor is invalid, the name is
    /// already taken, or the settings document cannot be written.
    pub fn add_provider(&mut self, config: ProviderConfig) -> Result<(), FactoryError> {
        config.validate()?;
        let name = config.name().to_owned();
        if self.settings.providers.contains_key(&name) {
            return Err(FactoryError::DuplicateProvider { name });
        }

        let provider = self.instantiate(&config);
        self.providers.insert(name.clone(), provider);
        self.settings.providers.insert(name, config);
        self.persist()
    }

    /// Removes a provider and persists the settings. Any live connection
    /// is closed in the background; removal never waits on teardown.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError`] when the provider is the current default,
    /// is unknown, or the settings document cannot be written.
    pub fn remove_provider(&mut self, name: &str) -> Result<(), FactoryError> {
        if name == self.settings.default_provider {
            return Err(FactoryError::RemoveDefault {
                name: name.to_owned(),
            });
        }
        if self.settings.providers.remove(name).is_none() {
            return Err(FactoryError::UnknownProvider {
                name: name.to_owned(),
            });
        }

        if let Some(provider) = self.providers.remove(name)
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            drop(handle.spawn(async move { provider.close().await }));
        }
        self.persist()
    }

    /// Promotes `name` to be the default provider and persists the
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::UnknownProvider`] when no instantiated
    /// provider carries that name, or an I/O error when persisting fails.
    pub fn set_default_provider(&mut self, name: &str) -> Result<(), FactoryError> {
        if !self.providers.contains_key(name) {
            return Err(FactoryError::UnknownProvider {
                name: name.to_owned(),
            });
        }
        self.settings.default_provider = name.to_owned();
        self.persist()
    }

    /// Summarizes every configured provider, including disabled entries.
    #[must_use]
    pub fn list_providers(&self) -> Vec<ProviderSummary> {
        self.settings
            .providers
            .values()
            .map(|config| ProviderSummary {
                name: config.name().to_owned(),
                kind: config.kind(),
                enabled: config.enabled(),
                is_default: config.name() == self.settings.default_provider,
            })
            .collect()
    }

    /// Probes every instantiated provider concurrently and returns a
    /// name-keyed map of reports. A probe that dies is reported as an
    /// unhealthy entry instead of aborting the batch.
    pub async fn check_all_providers_health(&self) -> BTreeMap<String, HealthReport> {
        let mut handles = Vec::with_capacity(self.providers.len());
        for (name, provider) in &self.providers {
            let probed = Arc::clone(provider);
            handles.push((
                name.clone(),
                tokio::spawn(async move { probed.check_health().await }),
            ));
        }

        let mut reports = BTreeMap::new();
        for (name, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(err) => HealthReport::unreachable(format!("health probe failed: {err}")),
            };
            reports.insert(name, report);
        }
        reports
    }

    /// Closes every live provider connection. Called on shutdown.
    pub async fn close_all(&self) {
        for provider in self.providers.values() {
            provider.close().await;
        }
    }

    fn instantiate_enabled(&mut self) -> Result<(), FactoryError> {
        for config in self.settings.providers.values() {
            config.validate()?;
            if !config.enabled() {
                continue;
            }
            let provider = self.instantiate(config);
            self.providers.insert(config.name().to_owned(), provider);
        }
        Ok(())
    }

    fn instantiate(&self, config: &ProviderConfig) -> Arc<dyn RuntimeProvider> {
        match config {
            ProviderConfig::Local(local) => Arc::new(LocalProvider::new(
                local.clone(),
                self.tooling.clone(),
                self.runner.clone(),
            )),
            ProviderConfig::Ssh(ssh) => Arc::new(SshProvider::new(
                ssh.clone(),
                self.tooling.clone(),
                self.runner.clone(),
            )),
        }
    }

    /// Rewrites the whole settings document. Entries are persisted with
    /// `enabled` forced true, matching the add/remove/promote semantics:
    /// a configured provider is a usable provider.
    fn persist(&self) -> Result<(), FactoryError> {
        let mut rendered = self.settings.clone();
        for config in rendered.providers.values_mut() {
            config.set_enabled(true);
        }
        write_settings(&self.settings_path, &rendered)
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), FactoryError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| FactoryError::Io {
        path: path.to_path_buf(),
        message: String::from("settings path is missing a filename"),
    })?;
    Ok((parent, file_name))
}

fn read_settings(path: &Utf8Path) -> Result<Option<ProviderSettings>, FactoryError> {
    let (parent, file_name) = split_path(path)?;

    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(FactoryError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            });
        }
    };

    let exists = dir.try_exists(file_name).map_err(|err| FactoryError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    if !exists {
        return Ok(None);
    }

    let contents = dir
        .read_to_string(file_name)
        .map_err(|err| FactoryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|err| FactoryError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn write_settings(path: &Utf8Path, settings: &ProviderSettings) -> Result<(), FactoryError> {
    let (parent, file_name) = split_path(path)?;

    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| FactoryError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| FactoryError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    let rendered =
        serde_json::to_string_pretty(settings).map_err(|err| FactoryError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    dir.write(file_name, rendered)
        .map_err(|err| FactoryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests;
