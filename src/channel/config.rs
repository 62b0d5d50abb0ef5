//! SSH channel configuration and validation.
//!
//! This module defines [`ChannelConfig`] for SSH client settings, along with
//! associated error types. Configuration is loaded via `ortho-config` which
//! merges defaults, configuration files, and environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default connection timeout passed to the SSH client, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// SSH client settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STEWARD_SSH",
    discovery(
        app_name = "steward",
        env_var = "STEWARD_CONFIG_PATH",
        config_file_name = "steward.toml",
        dotfile_name = ".steward.toml",
        project_file_name = "steward.toml"
    )
)]
pub struct ChannelConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub batch_mode: bool,
    /// Whether to enforce host key checking. Defaults to disabling so a
    /// freshly provisioned instance can be reached before its key is known.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override. Blank means the SSH client default.
    #[ortho_config(default = String::new())]
    pub known_hosts_file: String,
    /// Connection timeout passed to the SSH client, in seconds.
    #[ortho_config(default = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,
}

/// Errors raised when loading the channel configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ChannelConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

impl ChannelConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] when any required field is
    /// empty.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.ssh_bin.trim().is_empty() {
            return Err(ChannelError::InvalidConfig {
                field: String::from("ssh_bin"),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ChannelError::InvalidConfig {
                field: String::from("connect_timeout_secs"),
            });
        }
        Ok(())
    }

    /// Loads configuration using defaults, configuration files, and
    /// environment variables, without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ChannelConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("steward")])
            .map_err(|err| ChannelConfigLoadError::Parse(err.to_string()))
    }
}

/// Errors surfaced while executing remote commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ChannelError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set STEWARD_SSH_{env_suffix} or add {field} to [ssh] in steward.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when feeding stdin or collecting output fails mid-run.
    #[error("i/o failure while running {program}: {message}")]
    Io {
        /// Command being executed.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when an invocation exceeds its wall-clock ceiling.
    #[error("{program} did not finish within {limit_secs} seconds")]
    Timeout {
        /// Command that was killed.
        program: String,
        /// Ceiling that was exceeded, in seconds.
        limit_secs: u64,
    },
    /// Raised when the SSH client reports a connection or authentication
    /// failure (exit status 255).
    #[error("could not connect to {host}: {stderr}")]
    Connection {
        /// Host the connection was attempted against.
        host: String,
        /// Stderr captured from the SSH client.
        stderr: String,
    },
}
