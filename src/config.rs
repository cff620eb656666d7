//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::provision::{Provisioner, WARMUP_FLOOR};
use crate::store::SnapshotStore;

/// Default management API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.contentful.com";

/// Settings for talking to the content platform and storing snapshots,
/// merged from defaults, `snapmigrate.toml`, and `SNAPMIGRATE_*` variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SNAPMIGRATE",
    discovery(
        app_name = "snapmigrate",
        env_var = "SNAPMIGRATE_CONFIG_PATH",
        config_file_name = "snapmigrate.toml",
        dotfile_name = ".snapmigrate.toml",
        project_file_name = "snapmigrate.toml"
    )
)]
pub struct SnapConfig {
    /// Management API token. Required for every remote operation.
    #[ortho_config(default = String::new())]
    pub management_token: String,
    /// Management API base URL.
    #[ortho_config(default = DEFAULT_API_BASE.to_owned())]
    pub api_base: String,
    /// Export/import command-line tool.
    #[ortho_config(default = "contentful".to_owned())]
    pub cli_bin: String,
    /// Root directory of the snapshot store.
    #[ortho_config(default = "backups".to_owned())]
    pub snapshot_dir: String,
    /// Seconds to wait after creating an environment before polling it.
    /// Values below 20 are raised to 20.
    #[ortho_config(default = 20)]
    pub warmup_secs: u64,
    /// Initial readiness poll interval in seconds.
    #[ortho_config(default = 5)]
    pub ready_poll_secs: u64,
    /// Readiness polls made after the warm-up before giving up.
    #[ortho_config(default = 12)]
    pub ready_poll_attempts: u32,
    /// Display name for created environments; blank uses the id.
    #[ortho_config(default = String::new())]
    pub default_environment_name: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
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

impl SnapConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to snapmigrate.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("snapmigrate")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the settings every remote operation needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the variable and file key
    /// to set.
    pub fn validate_remote(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.management_token,
            &FieldMetadata::new(
                "management API token",
                "SNAPMIGRATE_MANAGEMENT_TOKEN",
                "management_token",
            ),
        )?;
        Self::require_field(
            &self.api_base,
            &FieldMetadata::new("API base URL", "SNAPMIGRATE_API_BASE", "api_base"),
        )?;
        Self::require_field(
            &self.cli_bin,
            &FieldMetadata::new(
                "export/import tool",
                "SNAPMIGRATE_CLI_BIN",
                "cli_bin",
            ),
        )?;
        self.validate_store()
    }

    /// Checks the settings local snapshot management needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the snapshot directory is
    /// blank.
    pub fn validate_store(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.snapshot_dir,
            &FieldMetadata::new(
                "snapshot directory",
                "SNAPMIGRATE_SNAPSHOT_DIR",
                "snapshot_dir",
            ),
        )
    }

    /// Builds the snapshot store rooted at `snapshot_dir`.
    #[must_use]
    pub fn snapshot_store(&self) -> SnapshotStore {
        SnapshotStore::new(Utf8PathBuf::from(self.snapshot_dir.trim()))
    }

    /// Builds a provisioner using the configured timings. The warm-up never
    /// drops below [`WARMUP_FLOOR`].
    #[must_use]
    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new()
            .with_warmup(Duration::from_secs(self.warmup_secs).max(WARMUP_FLOOR))
            .with_poll_interval(Duration::from_secs(self.ready_poll_secs.max(1)))
            .with_max_polls(self.ready_poll_attempts)
            .with_default_name(self.default_environment_name.clone())
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
