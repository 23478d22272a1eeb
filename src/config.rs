//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, the discovered `hangar.toml`, and `HANGAR_*`
//! environment variables in that order of precedence.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::aws::{AwsSettings, DEFAULT_AWS_BIN};
use crate::configure::ConfigureSettings;
use crate::files;
use crate::process::expand_tilde;
use crate::shell::SshSettings;
use crate::state_store::DEFAULT_STATE_FILE;
use crate::wait::{WaitPolicies, WaitPolicy};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "ap-southeast-2";

/// Deployment settings shared by every run.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HANGAR",
    discovery(
        app_name = "hangar",
        env_var = "HANGAR_CONFIG_PATH",
        config_file_name = "hangar.toml",
        dotfile_name = ".hangar.toml",
        project_file_name = "hangar.toml"
    )
)]
pub struct HangarConfig {
    /// Path to the `aws` executable.
    #[ortho_config(default = DEFAULT_AWS_BIN.to_owned())]
    pub aws_bin: String,
    /// Provider region.
    #[ortho_config(default = DEFAULT_REGION.to_owned())]
    pub region: String,
    /// Optional AWS CLI profile.
    pub profile: Option<String>,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote login user.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub ssh_user: String,
    /// Identity key used for every connection. This value is required.
    pub ssh_identity_file: String,
    /// Seconds allowed for each ssh connection attempt.
    #[ortho_config(default = 10)]
    pub ssh_connect_timeout_secs: u64,
    /// Flat-file state store.
    #[ortho_config(default = DEFAULT_STATE_FILE.to_owned())]
    pub state_file: String,
    /// Local provider credentials copied onto each instance.
    #[ortho_config(default = "~/.aws/credentials".to_owned())]
    pub credentials_file: String,
    /// Post-configuration command list, one command per line.
    pub post_config_script: Option<String>,
    /// Substrings marking post-configuration commands that read the admin
    /// password on stdin. Empty keeps the built-in markers.
    #[serde(default)]
    #[ortho_config(default = vec![], merge_strategy = "replace")]
    pub stdin_markers: Vec<String>,
    /// Abort an instance when a remote command exits non-zero.
    #[ortho_config(default = false)]
    pub fail_on_command_error: bool,
    /// Seconds between termination polls.
    #[ortho_config(default = 15)]
    pub terminate_poll_secs: u64,
    /// Seconds before termination polling gives up.
    #[ortho_config(default = 900)]
    pub terminate_timeout_secs: u64,
    /// Seconds between pending-state polls.
    #[ortho_config(default = 10)]
    pub pending_poll_secs: u64,
    /// Seconds before pending-state polling gives up.
    #[ortho_config(default = 600)]
    pub pending_timeout_secs: u64,
    /// Seconds to wait after an instance reports `running`.
    #[ortho_config(default = 30)]
    pub settle_delay_secs: u64,
    /// Seconds to wait after triggering a reboot.
    #[ortho_config(default = 60)]
    pub reboot_delay_secs: u64,
    /// Seconds before post-reboot reconnection gives up.
    #[ortho_config(default = 600)]
    pub reboot_timeout_secs: u64,
    /// Optional file receiving a copy of the log output.
    pub log_file: Option<String>,
}

struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl HangarConfig {
    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hangar")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to hangar.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "{} must be greater than zero: set {} or {} in hangar.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Checks required values and polling bounds. Error messages name the
    /// environment variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank required values and
    /// [`ConfigError::InvalidValue`] for zero poll intervals or ceilings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, metadata) in [
            (&self.aws_bin, FieldMetadata::new("AWS CLI path", "HANGAR_AWS_BIN", "aws_bin")),
            (&self.region, FieldMetadata::new("region", "HANGAR_REGION", "region")),
            (&self.ssh_bin, FieldMetadata::new("ssh path", "HANGAR_SSH_BIN", "ssh_bin")),
            (&self.ssh_user, FieldMetadata::new("ssh user", "HANGAR_SSH_USER", "ssh_user")),
            (
                &self.ssh_identity_file,
                FieldMetadata::new(
                    "ssh identity file",
                    "HANGAR_SSH_IDENTITY_FILE",
                    "ssh_identity_file",
                ),
            ),
            (
                &self.state_file,
                FieldMetadata::new("state file", "HANGAR_STATE_FILE", "state_file"),
            ),
            (
                &self.credentials_file,
                FieldMetadata::new(
                    "credentials file",
                    "HANGAR_CREDENTIALS_FILE",
                    "credentials_file",
                ),
            ),
        ] {
            Self::require_field(value, &metadata)?;
        }

        for (value, metadata) in [
            (
                self.terminate_poll_secs,
                FieldMetadata::new(
                    "termination poll interval",
                    "HANGAR_TERMINATE_POLL_SECS",
                    "terminate_poll_secs",
                ),
            ),
            (
                self.terminate_timeout_secs,
                FieldMetadata::new(
                    "termination timeout",
                    "HANGAR_TERMINATE_TIMEOUT_SECS",
                    "terminate_timeout_secs",
                ),
            ),
            (
                self.pending_poll_secs,
                FieldMetadata::new(
                    "pending poll interval",
                    "HANGAR_PENDING_POLL_SECS",
                    "pending_poll_secs",
                ),
            ),
            (
                self.pending_timeout_secs,
                FieldMetadata::new(
                    "pending timeout",
                    "HANGAR_PENDING_TIMEOUT_SECS",
                    "pending_timeout_secs",
                ),
            ),
            (
                self.reboot_timeout_secs,
                FieldMetadata::new(
                    "reboot timeout",
                    "HANGAR_REBOOT_TIMEOUT_SECS",
                    "reboot_timeout_secs",
                ),
            ),
        ] {
            Self::require_positive(value, &metadata)?;
        }
        Ok(())
    }

    /// Builds the named waits. Reconnection after a reboot is attempted at
    /// the pending poll interval.
    #[must_use]
    pub const fn wait_policies(&self) -> WaitPolicies {
        WaitPolicies {
            terminate_wait: WaitPolicy::from_secs(
                self.terminate_poll_secs,
                self.terminate_timeout_secs,
            ),
            pending_wait: WaitPolicy::from_secs(self.pending_poll_secs, self.pending_timeout_secs),
            reboot_wait: WaitPolicy::from_secs(self.pending_poll_secs, self.reboot_timeout_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            reboot_delay: Duration::from_secs(self.reboot_delay_secs),
        }
    }

    /// Settings for the AWS CLI provider.
    #[must_use]
    pub fn aws_settings(&self) -> AwsSettings {
        AwsSettings {
            aws_bin: self.aws_bin.clone(),
            region: self.region.clone(),
            profile: self.profile.clone(),
        }
    }

    /// Settings for the system ssh client.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            ssh_bin: self.ssh_bin.clone(),
            connect_timeout_secs: self.ssh_connect_timeout_secs,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(expand_tilde(&self.state_file))
    }

    /// Builds the connection-only settings used when configuration is
    /// skipped. No files are read, so no credentials or script are carried.
    #[must_use]
    pub fn session_settings(&self) -> ConfigureSettings {
        let mut settings =
            ConfigureSettings::new(&self.ssh_user, &self.ssh_identity_file, "", Vec::new());
        if !self.stdin_markers.is_empty() {
            settings.stdin_markers.clone_from(&self.stdin_markers);
        }
        settings.fail_on_command_error = self.fail_on_command_error;
        settings
    }

    /// Reads the credentials file and post-configuration script and builds
    /// the configuration inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when either file cannot be read.
    pub fn configure_settings(&self) -> Result<ConfigureSettings, ConfigError> {
        let mut settings = self.session_settings();
        settings.credentials = read_file(&self.credentials_file)?;
        if let Some(path) = &self.post_config_script {
            settings.post_config = read_file(path)?.lines().map(str::to_owned).collect();
        }
        Ok(settings)
    }

    /// Returns the settings a deployment needs: connection-only settings
    /// when configuration is skipped, otherwise the full configuration
    /// inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when configuration will run and a file
    /// cannot be read.
    pub fn deployment_settings(
        &self,
        skip_configuration: bool,
    ) -> Result<ConfigureSettings, ConfigError> {
        if skip_configuration {
            Ok(self.session_settings())
        } else {
            self.configure_settings()
        }
    }
}

fn read_file(path: &str) -> Result<String, ConfigError> {
    let expanded = Utf8PathBuf::from(expand_tilde(path));
    files::read_to_string(&expanded).map_err(|err| ConfigError::Read {
        path: expanded,
        message: err.to_string(),
    })
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// A file named by the configuration could not be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// File path after tilde expansion.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
