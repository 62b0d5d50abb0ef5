//! SSH remote command channel.
//!
//! Opens an authenticated connection to a target server with the system
//! `ssh` client and executes a single command or streamed script, returning
//! the remote exit status together with captured stdout and stderr.
//! Connection and authentication failures, deadline expiry, and ordinary
//! non-zero exits are reported distinguishably; the channel itself never
//! retries — retry policy belongs to the caller.

use std::ffi::OsString;

use crate::server::Server;

mod config;
mod types;
mod util;

pub use config::{
    ChannelConfig, ChannelConfigLoadError, ChannelError, DEFAULT_CONNECT_TIMEOUT_SECS,
};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput, RunOptions};
pub use util::expand_tilde;

/// SSH exit status the client reserves for its own connection errors.
const SSH_CLIENT_ERROR_EXIT: i32 = 255;

/// Executes remote commands over the system SSH client.
#[derive(Clone, Debug)]
pub struct SshChannel<R: CommandRunner> {
    config: ChannelConfig,
    runner: R,
}

impl SshChannel<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: ChannelConfig) -> Result<Self, ChannelError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshChannel<R> {
    /// Creates a new channel using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: ChannelConfig, runner: R) -> Result<Self, ChannelError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Executes `command` on `server` and returns the remote exit code with
    /// captured output.
    ///
    /// A non-zero remote exit is not an error at this layer; callers decide
    /// what a failing command means. The SSH client's own exit status 255 is
    /// mapped to [`ChannelError::Connection`] because it signals that the
    /// command never ran on the remote side.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Connection`] on connection or authentication
    /// failure, [`ChannelError::Timeout`] when `options` carry an expired
    /// deadline, and [`ChannelError::Spawn`]/[`ChannelError::Io`] when the
    /// local client process misbehaves.
    pub fn execute(
        &self,
        server: &Server,
        command: &str,
        options: &RunOptions,
    ) -> Result<RemoteCommandOutput, ChannelError> {
        let args = self.build_ssh_args(server, command);
        let output = self.runner.run(&self.config.ssh_bin, &args, options)?;

        if output.code == Some(SSH_CLIENT_ERROR_EXIT) {
            return Err(ChannelError::Connection {
                host: server.host.clone(),
                stderr: output.stderr,
            });
        }

        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn build_ssh_args(&self, server: &Server, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(server.port.to_string()),
        ];

        if let Some(ref identity_file) = server.identity_file {
            let expanded = expand_tilde(identity_file);
            args.push(OsString::from("-i"));
            args.push(OsString::from(expanded));
        }

        if self.config.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));

        args.push(OsString::from(format!(
            "{}@{}",
            server.username, server.host
        )));
        args.push(OsString::from(remote_command));
        args
    }
}

#[cfg(test)]
mod tests;
