//! Server records and the transient capability facts attached to them.
//!
//! A [`Server`] is owned by the inventory store; the orchestration core
//! borrows it for the duration of one command and fills in [`Server::info`]
//! at runtime. The facts map is never written back to the inventory file.

use serde::{Deserialize, Serialize};

use crate::playbook::ResultDoc;

/// Default SSH port for newly registered servers.
pub const DEFAULT_SSH_PORT: u16 = 22;

const fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// A managed server as recorded in the inventory.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Server {
    /// Unique name the operator refers to this server by.
    pub name: String,
    /// Hostname or IP address used for SSH connections.
    pub host: String,
    /// SSH port exposed by the server.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Remote user to authenticate as.
    pub username: String,
    /// Path to the SSH private key file. Supports tilde expansion. Optional;
    /// when not provided, SSH falls back to its default key locations.
    pub identity_file: Option<String>,
    /// Cloud provider that created this server, when provisioned by us.
    pub provider: Option<String>,
    /// Provider-assigned instance identifier, when provisioned by us.
    pub instance_id: Option<String>,
    /// Capability facts probed at runtime. Never persisted: the map is
    /// either absent (not yet probed this run) or fully populated with at
    /// least a distribution and a privilege level.
    #[serde(skip)]
    pub info: Option<ServerInfo>,
}

impl Server {
    /// Creates a record from connection details, without provider linkage.
    #[must_use]
    pub fn new(name: String, host: String, port: u16, login: Login) -> Self {
        Self {
            name,
            host,
            port,
            username: login.username,
            identity_file: login.identity_file,
            provider: None,
            instance_id: None,
            info: None,
        }
    }
}

/// SSH login details applied to a server record at creation time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Login {
    /// Remote user to authenticate as.
    pub username: String,
    /// Path to the SSH private key file, if any.
    pub identity_file: Option<String>,
}

/// Effective privilege level reported by the server-info probe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Privilege {
    /// Connected directly as root.
    Root,
    /// Passwordless sudo is available.
    Sudo,
    /// Neither root nor sudo; the server cannot be managed.
    None,
}

impl Privilege {
    /// Parses the privilege tag a probe script reports.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "root" => Self::Root,
            "sudo" => Self::Sudo,
            _ => Self::None,
        }
    }

    /// Returns `true` when the level permits configuration changes.
    #[must_use]
    pub const fn at_least_sudo(self) -> bool {
        matches!(self, Self::Root | Self::Sudo)
    }

    /// Tag used for the privilege-level control variable.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Sudo => "sudo",
            Self::None => "none",
        }
    }
}

/// Parsed and validated capability facts for one server.
///
/// Produced by the capability cache from the `server-info` playbook result;
/// construction implies the distribution and privilege checks have passed.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerInfo {
    distro: String,
    permissions: Privilege,
    facts: ResultDoc,
}

impl ServerInfo {
    /// Wraps validated facts. Callers are expected to have checked the
    /// distribution and privilege level beforehand.
    #[must_use]
    pub const fn new(distro: String, permissions: Privilege, facts: ResultDoc) -> Self {
        Self {
            distro,
            permissions,
            facts,
        }
    }

    /// Distribution family tag, for example `ubuntu`.
    #[must_use]
    pub fn distro(&self) -> &str {
        &self.distro
    }

    /// Effective privilege level on the server.
    #[must_use]
    pub const fn permissions(&self) -> Privilege {
        self.permissions
    }

    /// Looks up a scalar fact by key.
    #[must_use]
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.scalar(key)
    }

    /// Full structured result the probe returned.
    #[must_use]
    pub const fn facts(&self) -> &ResultDoc {
        &self.facts
    }
}
