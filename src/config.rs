//! Configuration loading via `ortho-config`.

use crate::provider::{InstanceSpec, SpecError};
use crate::server::Login;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// DigitalOcean specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DIGITALOCEAN",
    discovery(
        app_name = "steward",
        env_var = "STEWARD_CONFIG_PATH",
        config_file_name = "steward.toml",
        dotfile_name = ".steward.toml",
        project_file_name = "steward.toml"
    )
)]
pub struct DigitalOceanConfig {
    /// API token used for authentication. This value is required.
    pub api_token: String,
    /// Preferred region. Defaults to `nyc3`.
    #[ortho_config(default = "nyc3".to_owned())]
    pub default_region: String,
    /// Size slug for new instances. Defaults to `s-1vcpu-1gb` to minimise
    /// cost.
    #[ortho_config(default = "s-1vcpu-1gb".to_owned())]
    pub default_size: String,
    /// Image slug for new instances.
    #[ortho_config(default = "ubuntu-24-04-x64".to_owned())]
    pub default_image: String,
    /// SSH key identifiers or fingerprints installed at first boot.
    pub ssh_keys: Option<Vec<String>>,
    /// Whether provider-side backups are requested for new instances.
    #[ortho_config(default = false)]
    pub enable_backups: bool,
    /// Whether provider-side monitoring is requested for new instances.
    #[ortho_config(default = false)]
    pub enable_monitoring: bool,
    /// Whether an IPv6 address is requested for new instances.
    #[ortho_config(default = false)]
    pub enable_ipv6: bool,
    /// Optional VPC new instances join instead of the default network.
    pub vpc_id: Option<String>,
    /// User newly provisioned servers are connected as.
    #[ortho_config(default = "root".to_owned())]
    pub default_username: String,
    /// SSH private key file recorded on newly provisioned servers. Supports
    /// tilde expansion.
    pub identity_file: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl DigitalOceanConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in steward.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
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
        Self::load_from_iter([std::ffi::OsString::from("steward")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds an [`InstanceSpec`] for `name` using the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_spec(&self, name: &str) -> Result<InstanceSpec, ConfigError> {
        self.validate()?;
        InstanceSpec::builder()
            .name(name)
            .region(&self.default_region)
            .size(&self.default_size)
            .image(&self.default_image)
            .ssh_keys(self.ssh_keys.clone().unwrap_or_default())
            .backups(self.enable_backups)
            .monitoring(self.enable_monitoring)
            .ipv6(self.enable_ipv6)
            .vpc_id(self.vpc_id.clone())
            .build()
            .map_err(|err: SpecError| ConfigError::Parse(err.to_string()))
    }

    /// Login details recorded on servers this configuration provisions.
    #[must_use]
    pub fn login(&self) -> Login {
        Login {
            username: self.default_username.clone(),
            identity_file: self.identity_file.clone(),
        }
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_token,
            &FieldMetadata::new(
                "DigitalOcean API token",
                "DIGITALOCEAN_API_TOKEN",
                "api_token",
                "digitalocean",
            ),
        )?;
        Self::require_field(
            &self.default_region,
            &FieldMetadata::new(
                "region",
                "DIGITALOCEAN_DEFAULT_REGION",
                "default_region",
                "digitalocean",
            ),
        )?;
        Self::require_field(
            &self.default_size,
            &FieldMetadata::new(
                "instance size",
                "DIGITALOCEAN_DEFAULT_SIZE",
                "default_size",
                "digitalocean",
            ),
        )?;
        Self::require_field(
            &self.default_image,
            &FieldMetadata::new(
                "VM image",
                "DIGITALOCEAN_DEFAULT_IMAGE",
                "default_image",
                "digitalocean",
            ),
        )?;
        Self::require_field(
            &self.default_username,
            &FieldMetadata::new(
                "SSH username",
                "DIGITALOCEAN_DEFAULT_USERNAME",
                "default_username",
                "digitalocean",
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

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DigitalOceanConfig {
        DigitalOceanConfig {
            api_token: String::from("dop_v1_token"),
            default_region: String::from("nyc3"),
            default_size: String::from("s-1vcpu-1gb"),
            default_image: String::from("ubuntu-24-04-x64"),
            ssh_keys: Some(vec![String::from("ab:cd")]),
            enable_backups: false,
            enable_monitoring: true,
            enable_ipv6: false,
            vpc_id: None,
            default_username: String::from("root"),
            identity_file: Some(String::from("~/.ssh/id_ed25519")),
        }
    }

    #[test]
    fn as_spec_applies_defaults_and_flags() {
        let config = base_config();
        let spec = config
            .as_spec("steward-web1")
            .unwrap_or_else(|err| panic!("spec should build: {err}"));

        assert_eq!(spec.name, "steward-web1");
        assert_eq!(spec.region, "nyc3");
        assert_eq!(spec.ssh_keys, [String::from("ab:cd")]);
        assert!(spec.monitoring);
        assert!(!spec.backups);
        assert_eq!(spec.vpc_id, None);
    }

    #[test]
    fn validate_requires_an_api_token() {
        let config = DigitalOceanConfig {
            api_token: String::from("   "),
            ..base_config()
        };
        let err = config.validate().expect_err("blank token must fail");
        let ConfigError::MissingField(message) = err else {
            panic!("expected MissingField");
        };
        assert!(
            message.contains("DIGITALOCEAN_API_TOKEN"),
            "message must name the environment variable, got: {message}"
        );
    }

    #[test]
    fn login_copies_connection_defaults() {
        let config = base_config();
        let login = config.login();
        assert_eq!(login.username, "root");
        assert_eq!(login.identity_file.as_deref(), Some("~/.ssh/id_ed25519"));
    }
}
