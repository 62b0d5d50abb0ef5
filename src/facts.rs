//! Server capability cache.
//!
//! Before any configuration playbook touches a server, the fixed
//! `server-info` playbook probes its distribution, privilege level, and
//! hosted services. The parsed facts are memoised on the server record for
//! the remainder of the command run — an intra-run cache, not cross-run
//! persistence — and validated: an unsupported distribution or a privilege
//! level below sudo fails hard, blocking every subsequent playbook for that
//! server in the same command.

use thiserror::Error;

use crate::channel::CommandRunner;
use crate::playbook::{Mode, PlaybookEngine, PlaybookError, PlaybookResult, SERVER_INFO};
use crate::server::{Privilege, Server, ServerInfo};
use crate::vars::VarBag;

/// Distribution families playbooks are written against.
pub const SUPPORTED_DISTROS: &[&str] = &["ubuntu", "debian"];

/// Returns the server's capability facts, probing at most once per run.
///
/// When [`Server::info`] is already populated the call returns immediately
/// without any network I/O. Otherwise the `server-info` playbook runs (with
/// no variables beyond the control set), its result is validated, and the
/// facts are stored on the record.
///
/// # Errors
///
/// Returns [`FactsError::Playbook`] when the probe itself fails,
/// [`FactsError::UnsupportedDistro`] for distributions outside
/// [`SUPPORTED_DISTROS`], and [`FactsError::InsufficientPrivilege`] when the
/// probe reports neither root nor passwordless sudo.
pub fn ensure_info<'s, R: CommandRunner>(
    engine: &PlaybookEngine<R>,
    server: &'s mut Server,
) -> Result<&'s ServerInfo, FactsError> {
    let info = match server.info.take() {
        Some(existing) => existing,
        None => probe(engine, server)?,
    };
    Ok(server.info.insert(info))
}

fn probe<R: CommandRunner>(
    engine: &PlaybookEngine<R>,
    server: &Server,
) -> Result<ServerInfo, FactsError> {
    let result = engine.run(server, SERVER_INFO, &VarBag::new(), Mode::Silent)?;
    validate(&result)
}

fn validate(result: &PlaybookResult) -> Result<ServerInfo, FactsError> {
    let distro = result
        .scalar("distro")
        .ok_or(FactsError::MissingFact { key: "distro" })?
        .to_owned();
    let permissions = result
        .scalar("permissions")
        .ok_or(FactsError::MissingFact { key: "permissions" })?;

    if !SUPPORTED_DISTROS.contains(&distro.as_str()) {
        return Err(FactsError::UnsupportedDistro { distro });
    }

    let privilege = Privilege::parse(permissions);
    if !privilege.at_least_sudo() {
        return Err(FactsError::InsufficientPrivilege {
            permissions: permissions.to_owned(),
        });
    }

    Ok(ServerInfo::new(
        distro,
        privilege,
        result.doc().clone(),
    ))
}

/// Errors raised while probing or validating server capabilities.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FactsError {
    /// The probe playbook itself failed.
    #[error(transparent)]
    Playbook(#[from] PlaybookError),
    /// The probe result omitted a fact this module depends on.
    #[error("server-info result omitted the {key} fact")]
    MissingFact {
        /// Fact key that was absent.
        key: &'static str,
    },
    /// The server runs a distribution playbooks are not written for.
    #[error("unsupported distribution: {distro}")]
    UnsupportedDistro {
        /// Distribution tag the probe reported.
        distro: String,
    },
    /// The connection user cannot escalate privileges.
    #[error("insufficient privilege level {permissions:?}: root or passwordless sudo is required")]
    InsufficientPrivilege {
        /// Privilege tag the probe reported.
        permissions: String,
    },
}
