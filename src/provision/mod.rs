//! Provisioning state machine for cloud-hosted servers.
//!
//! Drives a new virtual machine through
//! `creating → active → ip-resolved → ssh-ready → registered` with bounded
//! fixed-interval polling against the provider, then bounded fixed-backoff
//! SSH probes over the remote command channel, and finally a capability
//! probe so the server is verified before it is handed to the inventory.
//! A timeout is a distinct terminal failure and performs no automatic
//! cleanup: the caller decides whether to destroy. Teardown itself is
//! idempotent because providers treat "already gone" as success.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::channel::{CommandRunner, RunOptions};
use crate::facts::{self, FactsError};
use crate::playbook::PlaybookEngine;
use crate::provider::{InstanceHandle, InstanceSpec, Provider, STATUS_ACTIVE};
use crate::server::{DEFAULT_SSH_PORT, Login, Server};

mod clock;

pub use clock::{Clock, SleepFuture, TokioClock};

/// Default interval between provider status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default wall-clock ceiling for the status poll.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of SSH readiness probes.
pub const DEFAULT_SSH_ATTEMPTS: u32 = 30;

/// Default fixed backoff between SSH readiness probes.
pub const DEFAULT_SSH_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Command used to probe SSH readiness; any successful execution counts.
const SSH_PROBE_COMMAND: &str = "true";

/// Lifecycle states of a provisioning session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisionState {
    /// The create call has been issued; waiting for the provider.
    Creating,
    /// The provider reports the instance active.
    Active,
    /// A public IPv4 address has been extracted.
    IpResolved,
    /// A trivial command has succeeded over SSH.
    SshReady,
    /// The server has been probed and is ready for the inventory.
    Registered,
}

impl ProvisionState {
    /// Stable tag for operator-facing messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::IpResolved => "ip-resolved",
            Self::SshReady => "ssh-ready",
            Self::Registered => "registered",
        }
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives instance creation until a verified, registered server.
pub struct Provisioner<P, R>
where
    P: Provider,
    R: CommandRunner,
{
    provider: P,
    engine: PlaybookEngine<R>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    wait_timeout: Duration,
    ssh_attempts: u32,
    ssh_retry_interval: Duration,
}

impl<P, R> Provisioner<P, R>
where
    P: Provider,
    R: CommandRunner,
{
    /// Creates a provisioner with production timing defaults.
    #[must_use]
    pub fn new(provider: P, engine: PlaybookEngine<R>) -> Self {
        Self {
            provider,
            engine,
            clock: Arc::new(TokioClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            ssh_attempts: DEFAULT_SSH_ATTEMPTS,
            ssh_retry_interval: DEFAULT_SSH_RETRY_INTERVAL,
        }
    }

    /// Overrides the status polling interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the status polling wall-clock ceiling.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Overrides the SSH readiness retry policy.
    #[must_use]
    pub const fn with_ssh_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.ssh_attempts = attempts;
        self.ssh_retry_interval = interval;
        self
    }

    /// Replaces the clock, letting tests simulate elapsed time.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Provisions an instance and returns a verified server record.
    ///
    /// The returned record carries the provider linkage and freshly probed
    /// capability facts; persisting it is the inventory's responsibility.
    /// On failure no cleanup is performed automatically — the instance, if
    /// one was created, remains at the provider until explicitly destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] describing the phase that failed:
    /// creation, status polling, timeout, missing public address, SSH
    /// unreachability, or the final capability probe.
    pub async fn provision(
        &self,
        name: &str,
        spec: &InstanceSpec,
        login: &Login,
    ) -> Result<Server, ProvisionError<P::Error>> {
        let handle = self
            .provider
            .create_instance(spec)
            .await
            .map_err(ProvisionError::Create)?;

        self.wait_for_active(&handle).await?;
        let address = self.resolve_public_ip(&handle).await?;

        let mut server = Server::new(
            name.to_owned(),
            address.to_string(),
            DEFAULT_SSH_PORT,
            login.clone(),
        );
        server.provider = Some(self.provider.slug().to_owned());
        server.instance_id = Some(handle.id.clone());

        self.wait_for_ssh(&handle, &server).await?;

        facts::ensure_info(&self.engine, &mut server).map_err(|source| {
            ProvisionError::Register {
                instance_id: handle.id.clone(),
                source,
            }
        })?;

        Ok(server)
    }

    /// Requests provider-side teardown for a previously created instance.
    ///
    /// Safe to repeat: the provider treats an already deleted instance as
    /// success.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Destroy`] when the provider rejects the
    /// request for any reason other than the instance being gone.
    pub async fn destroy(
        &self,
        handle: &InstanceHandle,
    ) -> Result<(), ProvisionError<P::Error>> {
        self.provider
            .destroy_instance(handle)
            .await
            .map_err(ProvisionError::Destroy)
    }

    async fn wait_for_active(
        &self,
        handle: &InstanceHandle,
    ) -> Result<(), ProvisionError<P::Error>> {
        let deadline = self.clock.now() + self.wait_timeout;
        while self.clock.now() <= deadline {
            let status = self
                .provider
                .instance_status(handle)
                .await
                .map_err(|source| ProvisionError::Status {
                    instance_id: handle.id.clone(),
                    source,
                })?;
            if status == STATUS_ACTIVE {
                return Ok(());
            }
            self.clock.sleep(self.poll_interval).await;
        }

        Err(ProvisionError::TimedOut {
            instance_id: handle.id.clone(),
            state: ProvisionState::Creating,
            waited_secs: self.wait_timeout.as_secs(),
        })
    }

    async fn resolve_public_ip(
        &self,
        handle: &InstanceHandle,
    ) -> Result<std::net::Ipv4Addr, ProvisionError<P::Error>> {
        let snapshot = self
            .provider
            .fetch_instance(handle)
            .await
            .map_err(|source| ProvisionError::Status {
                instance_id: handle.id.clone(),
                source,
            })?;

        snapshot
            .public_ipv4()
            .ok_or_else(|| ProvisionError::MissingPublicIp {
                instance_id: handle.id.clone(),
            })
    }

    async fn wait_for_ssh(
        &self,
        handle: &InstanceHandle,
        server: &Server,
    ) -> Result<(), ProvisionError<P::Error>> {
        let mut last_failure = String::from("no probe attempted");
        for attempt in 1..=self.ssh_attempts {
            match self
                .engine
                .channel()
                .execute(server, SSH_PROBE_COMMAND, &RunOptions::default())
            {
                Ok(output) if output.is_success() => return Ok(()),
                Ok(output) => {
                    last_failure = format!(
                        "probe exited with status {}",
                        output
                            .exit_code
                            .map_or_else(|| String::from("unknown"), |code| code.to_string())
                    );
                }
                Err(err) => last_failure = err.to_string(),
            }
            if attempt < self.ssh_attempts {
                self.clock.sleep(self.ssh_retry_interval).await;
            }
        }

        Err(ProvisionError::SshUnreachable {
            instance_id: handle.id.clone(),
            attempts: self.ssh_attempts,
            message: last_failure,
        })
    }
}

/// Errors surfaced while provisioning or destroying an instance.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the create call fails.
    #[error("failed to create instance: {0}")]
    Create(#[source] E),
    /// Raised when a status poll or snapshot fetch fails.
    #[error("failed to poll instance {instance_id}: {source}")]
    Status {
        /// Provider instance identifier.
        instance_id: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when the instance does not reach the expected state within
    /// the wall-clock ceiling. Distinct from script failures so callers can
    /// offer a destroy-and-recreate remedy.
    #[error("timed out after {waited_secs} seconds with instance {instance_id} still {state}")]
    TimedOut {
        /// Provider instance identifier.
        instance_id: String,
        /// State the session was stuck in.
        state: ProvisionState,
        /// Configured ceiling, in seconds.
        waited_secs: u64,
    },
    /// Raised when an active instance never exposes a public IPv4 address.
    #[error("instance {instance_id} has no public IPv4 address")]
    MissingPublicIp {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when the instance stays unreachable over SSH.
    #[error("instance {instance_id} unreachable over ssh after {attempts} attempts: {message}")]
    SshUnreachable {
        /// Provider instance identifier.
        instance_id: String,
        /// Number of probes attempted.
        attempts: u32,
        /// Detail from the final failed probe.
        message: String,
    },
    /// Raised when the reachable instance fails the capability probe.
    #[error("failed to register instance {instance_id}: {source}")]
    Register {
        /// Provider instance identifier.
        instance_id: String,
        /// Underlying probe or validation error.
        #[source]
        source: FactsError,
    },
    /// Raised when provider-side teardown fails.
    #[error("failed to destroy instance: {0}")]
    Destroy(#[source] E),
}
