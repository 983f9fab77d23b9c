//! Persisted descriptors for runtime execution targets.
//!
//! Each configured target is one [`ProviderConfig`] entry in the provider
//! settings document. The variant tag doubles as the persisted `type` field,
//! so an unknown type fails at deserialization instead of producing a
//! half-configured provider.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default SSH port used when a configuration omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;

const fn default_enabled() -> bool {
    true
}

const fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Identifies a provider implementation variant.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Commands run as direct child processes of this host.
    Local,
    /// Commands run on a remote host over a multiplexed SSH connection.
    Ssh,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => formatter.write_str("local"),
            Self::Ssh => formatter.write_str("ssh"),
        }
    }
}

/// Host key verification policy for SSH targets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownHostsPolicy {
    /// Accept unseen host keys and keep no known-hosts state. Suits lab
    /// hosts that are reimaged frequently.
    #[default]
    Accept,
    /// Enforce strict host key checking against the user's known hosts.
    Strict,
}

/// Persisted descriptor of one execution target.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Direct execution on this host.
    Local(LocalProviderConfig),
    /// Execution on a remote host over SSH.
    Ssh(SshProviderConfig),
}

/// Settings for a local execution target.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LocalProviderConfig {
    /// Unique provider name.
    pub name: String,
    /// Whether the provider is instantiated at load time.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Settings for a remote SSH execution target.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SshProviderConfig {
    /// Unique provider name.
    pub name: String,
    /// Whether the provider is instantiated at load time.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Remote host name or address.
    pub host: String,
    /// Remote SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Remote user to connect as.
    pub username: String,
    /// Password credential. Ignored when a private key path is also set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Path to the SSH private key file. Takes precedence over a password.
    /// Supports tilde expansion (`~/.ssh/id_ed25519`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    /// Host key verification policy.
    #[serde(default)]
    pub known_hosts: KnownHostsPolicy,
}

/// Errors raised while validating a provider configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderConfigError {
    /// Raised when the provider name is empty or whitespace.
    #[error("provider name must not be empty")]
    MissingName,
    /// Raised when a required SSH field is empty.
    #[error("ssh provider {name} is missing {field}")]
    MissingField {
        /// Provider whose configuration is incomplete.
        name: String,
        /// Field that failed validation.
        field: String,
    },
    /// Raised when neither credential is configured for an SSH target.
    #[error("ssh provider {name} needs a password or a private_key_path")]
    MissingCredentials {
        /// Provider whose configuration is incomplete.
        name: String,
    },
}

impl ProviderConfig {
    /// Returns the provider's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Local(config) => &config.name,
            Self::Ssh(config) => &config.name,
        }
    }

    /// Returns whether the provider should be instantiated at load time.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        match self {
            Self::Local(config) => config.enabled,
            Self::Ssh(config) => config.enabled,
        }
    }

    /// Returns the implementation variant this entry describes.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Local(_) => ProviderKind::Local,
            Self::Ssh(_) => ProviderKind::Ssh,
        }
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        match self {
            Self::Local(config) => config.enabled = enabled,
            Self::Ssh(config) => config.enabled = enabled,
        }
    }

    /// Validates the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderConfigError`] when the name is blank, a required
    /// SSH field is blank, or an SSH target configures no credential.
    pub fn validate(&self) -> Result<(), ProviderConfigError> {
        if self.name().trim().is_empty() {
            return Err(ProviderConfigError::MissingName);
        }
        match self {
            Self::Local(_) => Ok(()),
            Self::Ssh(config) => config.validate_ssh_fields(),
        }
    }
}

impl SshProviderConfig {
    fn validate_ssh_fields(&self) -> Result<(), ProviderConfigError> {
        for (value, field) in [(&self.host, "host"), (&self.username, "username")] {
            if value.trim().is_empty() {
                return Err(ProviderConfigError::MissingField {
                    name: self.name.clone(),
                    field: field.to_owned(),
                });
            }
        }

        let has_password = self
            .password
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty());
        let has_key = self
            .private_key_path
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty());
        if !has_password && !has_key {
            return Err(ProviderConfigError::MissingCredentials {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}
