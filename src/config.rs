//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Backup batch configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "OSBAK")]
pub struct BackupConfig {
    /// Keystone identity endpoint used for authentication. This value is
    /// required.
    pub auth_url: String,
    /// User identifier for password authentication. This value is required.
    pub user_id: String,
    /// Password for the user. This value is required.
    pub password: String,
    /// Project identifier scoping the issued token. This value is required.
    pub project_id: String,
    /// Volume status treated as usable for snapshotting and sweeping.
    #[ortho_config(default = "available".to_owned())]
    pub volume_status: String,
    /// Server status treated as usable for imaging.
    #[ortho_config(default = "ACTIVE".to_owned())]
    pub server_status: String,
    /// Name prefix applied to generated snapshots and images. The retention
    /// sweeper only ever deletes resources carrying this prefix.
    #[ortho_config(default = "snapshot_".to_owned())]
    pub snapshot_prefix: String,
    /// `chrono` format string for the timestamp embedded in generated names.
    #[ortho_config(default = "%Y%m%d%H%M%S".to_owned())]
    pub timestamp_format: String,
    /// Seconds between status polls while waiting on snapshot completion.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// Maximum status checks before an image poll is declared exhausted.
    #[ortho_config(default = 100)]
    pub poll_attempts: u32,
    /// Seconds to wait for a volume snapshot to reach the usable status.
    #[ortho_config(default = 60)]
    pub snapshot_wait_secs: u64,
    /// Age in hours beyond which generated snapshots are purged. Defaults to
    /// two weeks.
    #[ortho_config(default = 336)]
    pub retention_hours: u32,
    /// Maximum number of snapshot units dispatched concurrently.
    #[ortho_config(default = 8)]
    pub concurrency: usize,
}

/// Run-time policy handed to the orchestrators and the sweeper.
///
/// Constructed once per batch from [`BackupConfig`] and passed by reference,
/// never read from ambient global state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupPolicy {
    /// Volume status treated as usable.
    pub volume_status: String,
    /// Server status treated as usable.
    pub server_status: String,
    /// Name prefix applied to generated snapshots and images.
    pub snapshot_prefix: String,
    /// Timestamp format embedded in generated names.
    pub timestamp_format: String,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Maximum status checks per image poll.
    pub poll_attempts: u32,
    /// Bounded wait for volume snapshot completion.
    pub snapshot_wait: Duration,
    /// Retention window in hours for the sweeper.
    pub retention_hours: u32,
    /// Concurrency limit for the fan-out pool.
    pub concurrency: usize,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl BackupConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to osbak.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("osbak")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds the run-time [`BackupPolicy`] after validating the source
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn policy(&self) -> Result<BackupPolicy, ConfigError> {
        self.validate()?;
        Ok(BackupPolicy {
            volume_status: self.volume_status.clone(),
            server_status: self.server_status.clone(),
            snapshot_prefix: self.snapshot_prefix.clone(),
            timestamp_format: self.timestamp_format.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_attempts: self.poll_attempts,
            snapshot_wait: Duration::from_secs(self.snapshot_wait_secs),
            retention_hours: self.retention_hours,
            concurrency: self.concurrency,
        })
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.auth_url,
            &FieldMetadata::new("identity endpoint URL", "OSBAK_AUTH_URL", "auth_url"),
        )?;
        Self::require_field(
            &self.user_id,
            &FieldMetadata::new("user identifier", "OSBAK_USER_ID", "user_id"),
        )?;
        Self::require_field(
            &self.password,
            &FieldMetadata::new("user password", "OSBAK_PASSWORD", "password"),
        )?;
        Self::require_field(
            &self.project_id,
            &FieldMetadata::new("project identifier", "OSBAK_PROJECT_ID", "project_id"),
        )?;
        Self::require_field(
            &self.snapshot_prefix,
            &FieldMetadata::new(
                "generated snapshot name prefix",
                "OSBAK_SNAPSHOT_PREFIX",
                "snapshot_prefix",
            ),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
