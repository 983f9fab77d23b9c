//! Application configuration loaded via `ortho-config`.
//!
//! Values are merged from defaults, `topolab.toml` discovery candidates,
//! and `TOPOLAB_*` environment variables.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::provider::ProviderTooling;
use crate::util::expand_tilde;

/// Default directory holding provider settings, the lab registry, and
/// downloaded topology definitions.
pub const DEFAULT_STATE_DIR: &str = "~/.topolab";

/// Default remote directory topology files are staged into before a
/// remote deploy.
pub const DEFAULT_REMOTE_STAGE_DIR: &str = "/tmp";

/// Application settings derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, Eq, OrthoConfig, PartialEq)]
#[ortho_config(
    prefix = "TOPOLAB",
    discovery(
        app_name = "topolab",
        env_var = "TOPOLAB_CONFIG_PATH",
        config_file_name = "topolab.toml",
        dotfile_name = ".topolab.toml",
        project_file_name = "topolab.toml"
    )
)]
pub struct AppConfig {
    /// Directory holding persisted state. Supports tilde expansion.
    #[ortho_config(default = DEFAULT_STATE_DIR.to_owned())]
    pub state_dir: String,
    /// Path to the topology deploy/destroy/inspect binary.
    #[ortho_config(default = "containerlab".to_owned())]
    pub containerlab_bin: String,
    /// Path to the container runtime binary used for health probes.
    #[ortho_config(default = "docker".to_owned())]
    pub docker_bin: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the `sshpass` executable used for password-authenticated
    /// SSH targets.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Remote directory topology files are staged into.
    #[ortho_config(default = DEFAULT_REMOTE_STAGE_DIR.to_owned())]
    pub remote_stage_dir: String,
}

/// Errors raised while loading or validating the application settings.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum AppConfigError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set TOPOLAB_{env_suffix} or add {field} to topolab.toml", env_suffix = field.to_uppercase())]
    Invalid {
        /// Configuration field that failed validation.
        field: String,
    },
}

impl AppConfig {
    /// Loads configuration using defaults, configuration files, and
    /// environment variables, without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`AppConfigError::Parse`] when merging sources fails, or
    /// [`AppConfigError::Invalid`] when a required value is blank.
    pub fn load_without_cli_args() -> Result<Self, AppConfigError> {
        let config = Self::load_from_iter([std::ffi::OsString::from("topolab")])
            .map_err(|err| AppConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`AppConfigError::Invalid`] when any required field is
    /// empty.
    pub fn validate(&self) -> Result<(), AppConfigError> {
        let fields = [
            (&self.state_dir, "state_dir"),
            (&self.containerlab_bin, "containerlab_bin"),
            (&self.docker_bin, "docker_bin"),
            (&self.ssh_bin, "ssh_bin"),
            (&self.scp_bin, "scp_bin"),
            (&self.sshpass_bin, "sshpass_bin"),
            (&self.remote_stage_dir, "remote_stage_dir"),
        ];
        for (value, field) in fields {
            if value.trim().is_empty() {
                return Err(AppConfigError::Invalid {
                    field: field.to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Returns the expanded state directory.
    #[must_use]
    pub fn state_dir_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(expand_tilde(&self.state_dir))
    }

    /// Returns the provider settings document path.
    #[must_use]
    pub fn provider_settings_path(&self) -> Utf8PathBuf {
        self.state_dir_path().join("providers.json")
    }

    /// Returns the lab registry document path.
    #[must_use]
    pub fn registry_path(&self) -> Utf8PathBuf {
        self.state_dir_path().join("labs.json")
    }

    /// Returns the scratch directory for downloaded topology definitions.
    #[must_use]
    pub fn scratch_dir(&self) -> Utf8PathBuf {
        self.state_dir_path().join("downloads")
    }

    /// Returns the remote staging directory.
    #[must_use]
    pub fn remote_stage_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.remote_stage_dir)
    }

    /// Returns the tool binaries handed to providers.
    #[must_use]
    pub fn tooling(&self) -> ProviderTooling {
        ProviderTooling {
            containerlab_bin: self.containerlab_bin.clone(),
            docker_bin: self.docker_bin.clone(),
            ssh_bin: self.ssh_bin.clone(),
            scp_bin: self.scp_bin.clone(),
            sshpass_bin: self.sshpass_bin.clone(),
        }
    }
}
