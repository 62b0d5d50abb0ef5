//! Playbook dispatch: one remote script invocation end-to-end.
//!
//! The engine resolves a playbook identifier to an embedded script asset,
//! inlines the shared helpers ahead of the body, marshals variables into
//! shell exports alongside the three control variables every invocation
//! receives, streams the payload to the remote interpreter, and finally
//! fetches and parses the structured result artifact. The artifact is the
//! authoritative success signal: a zero exit code without a parseable
//! artifact is still a failure, and a non-zero exit fails regardless of
//! whatever the script managed to write.

use thiserror::Error;
use uuid::Uuid;

use crate::channel::{ChannelError, CommandRunner, RemoteCommandOutput, RunOptions, SshChannel};
use crate::server::Server;
use crate::vars::{MarshalError, VarBag, marshal};

pub mod assets;
mod result;

pub use assets::{HELPERS, SERVER_INFO, ScriptAsset};
pub use result::{ResultDoc, ResultParseError, ResultValue};

/// Remote interpreter the payload is streamed to.
const INTERPRETER: &str = "sh -s";

/// Variable names injected into every invocation and refused from callers.
const CONTROL_VARIABLES: &[&str] = &["OUTPUT_FILE", "DISTRO", "PERMISSIONS"];

/// Distribution tag used before the server has been probed.
const UNKNOWN_DISTRO: &str = "unknown";

/// Progress relay mode for one invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Discard live progress; only the terminal outcome is surfaced.
    Silent,
    /// Relay script stdout lines to the operator as they arrive.
    Visible,
}

/// Successful playbook outcome: the parsed result artifact.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybookResult {
    playbook: String,
    status: String,
    doc: ResultDoc,
}

impl PlaybookResult {
    /// Identifier of the playbook that produced this result.
    #[must_use]
    pub fn playbook(&self) -> &str {
        &self.playbook
    }

    /// Value of the mandatory `status` key.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Looks up a scalar result entry.
    #[must_use]
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.doc.scalar(key)
    }

    /// Looks up a nested map entry.
    #[must_use]
    pub fn map(&self, key: &str) -> Option<&[(String, String)]> {
        self.doc.map(key)
    }

    /// Full parsed document.
    #[must_use]
    pub const fn doc(&self) -> &ResultDoc {
        &self.doc
    }

    /// Consumes the result, yielding the parsed document.
    #[must_use]
    pub fn into_doc(self) -> ResultDoc {
        self.doc
    }
}

/// Orchestrates playbook execution over an SSH channel.
#[derive(Clone, Debug)]
pub struct PlaybookEngine<R: CommandRunner> {
    channel: SshChannel<R>,
}

impl<R: CommandRunner> PlaybookEngine<R> {
    /// Creates an engine over the given channel.
    #[must_use]
    pub const fn new(channel: SshChannel<R>) -> Self {
        Self { channel }
    }

    /// Returns the underlying channel, for callers that need raw commands.
    #[must_use]
    pub const fn channel(&self) -> &SshChannel<R> {
        &self.channel
    }

    /// Runs one playbook end-to-end and returns its parsed result.
    ///
    /// Idempotency is the script's contract, not the engine's: every call
    /// causes a real remote execution.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybookError::UnknownPlaybook`] before any network call
    /// for unrecognised identifiers, [`PlaybookError::ReservedVariable`] and
    /// marshaling errors likewise, [`PlaybookError::Channel`] for
    /// connectivity failures, and the execution-failure variants when the
    /// script exits non-zero or the result artifact is missing, malformed,
    /// or incomplete.
    pub fn run(
        &self,
        server: &Server,
        playbook_id: &str,
        vars: &VarBag,
        mode: Mode,
    ) -> Result<PlaybookResult, PlaybookError> {
        let asset = assets::resolve(playbook_id).ok_or_else(|| PlaybookError::UnknownPlaybook {
            id: playbook_id.to_owned(),
        })?;
        reject_reserved(vars)?;

        let output_path = unique_output_path();
        let payload = render_payload(server, asset, vars, &output_path)?;

        let exec_options = RunOptions {
            stdin: Some(payload),
            timeout: None,
            stream_progress: matches!(mode, Mode::Visible),
        };
        let execution = self.channel.execute(server, INTERPRETER, &exec_options)?;
        if !execution.is_success() {
            return Err(script_failure(asset.id, &execution));
        }

        let fetched = self.fetch_artifact(server, &output_path)?;
        if !fetched.is_success() {
            return Err(PlaybookError::MissingArtifact {
                id: asset.id.to_owned(),
                path: output_path,
            });
        }

        let doc =
            ResultDoc::parse(&fetched.stdout).map_err(|source| PlaybookError::MalformedResult {
                id: asset.id.to_owned(),
                source,
            })?;
        finish_result(asset, doc)
    }

    fn fetch_artifact(
        &self,
        server: &Server,
        output_path: &str,
    ) -> Result<RemoteCommandOutput, ChannelError> {
        let escaped = shell_escape::unix::escape(output_path.into());
        let command = format!("cat {escaped} && rm -f -- {escaped}");
        self.channel.execute(server, &command, &RunOptions::default())
    }
}

fn reject_reserved(vars: &VarBag) -> Result<(), PlaybookError> {
    for (name, _) in vars.iter() {
        if CONTROL_VARIABLES.contains(&name) {
            return Err(PlaybookError::ReservedVariable {
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}

fn render_payload(
    server: &Server,
    asset: &ScriptAsset,
    vars: &VarBag,
    output_path: &str,
) -> Result<String, PlaybookError> {
    let mut bag = VarBag::new();
    bag.set_text("OUTPUT_FILE", output_path)?;
    let (distro, permissions) = server.info.as_ref().map_or_else(
        || (UNKNOWN_DISTRO.to_owned(), String::from("none")),
        |info| {
            (
                info.distro().to_owned(),
                info.permissions().as_str().to_owned(),
            )
        },
    );
    bag.set_text("DISTRO", distro)?;
    bag.set_text("PERMISSIONS", permissions)?;
    for (name, value) in vars.iter() {
        bag.set(name, value.clone())?;
    }

    let exports = marshal(&bag)?;
    Ok(format!(
        "set -o pipefail\n{exports}\n\n{helpers}\n{body}",
        helpers = HELPERS,
        body = asset.body
    ))
}

fn finish_result(asset: &ScriptAsset, doc: ResultDoc) -> Result<PlaybookResult, PlaybookError> {
    let mut missing: Vec<String> = Vec::new();
    if doc.scalar("status").is_none() {
        missing.push(String::from("status"));
    }
    for key in asset.required_keys {
        if doc.get(key).is_none() {
            missing.push((*key).to_owned());
        }
    }
    if !missing.is_empty() {
        return Err(PlaybookError::MissingKeys {
            id: asset.id.to_owned(),
            keys: missing,
        });
    }

    let status = doc.scalar("status").unwrap_or_default().to_owned();
    Ok(PlaybookResult {
        playbook: asset.id.to_owned(),
        status,
        doc,
    })
}

fn script_failure(id: &str, output: &RemoteCommandOutput) -> PlaybookError {
    let status_text = output
        .exit_code
        .map_or_else(|| String::from("unknown"), |code| code.to_string());
    let detail = if output.stderr.trim().is_empty() {
        output.stdout.clone()
    } else {
        output.stderr.clone()
    };
    PlaybookError::ScriptFailure {
        id: id.to_owned(),
        exit_code: output.exit_code,
        status_text,
        detail,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    }
}

fn unique_output_path() -> String {
    format!("/tmp/steward-{}.out", Uuid::new_v4().simple())
}

/// Errors surfaced while dispatching a playbook.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PlaybookError {
    /// Raised before any network call for unrecognised identifiers.
    #[error("unknown playbook: {id}")]
    UnknownPlaybook {
        /// Identifier that failed to resolve.
        id: String,
    },
    /// Raised before any network call when a caller variable collides with
    /// the invocation protocol.
    #[error("variable {name} is reserved for the invocation protocol")]
    ReservedVariable {
        /// Colliding variable name.
        name: String,
    },
    /// Raised when variables cannot be marshaled.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// Raised for connectivity and local client failures.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// Raised when the script exits non-zero. The captured output is
    /// surfaced verbatim; scripts are required to explain their own
    /// failures.
    #[error("playbook {id} exited with status {status_text}: {detail}")]
    ScriptFailure {
        /// Playbook that failed.
        id: String,
        /// Remote exit code, if one was reported.
        exit_code: Option<i32>,
        /// Human-readable exit status.
        status_text: String,
        /// Primary failure detail (stderr, falling back to stdout).
        detail: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the script exited zero but wrote no result artifact.
    #[error("playbook {id} wrote no result artifact at {path}")]
    MissingArtifact {
        /// Playbook that failed.
        id: String,
        /// Remote path the artifact was expected at.
        path: String,
    },
    /// Raised when the artifact exists but cannot be parsed.
    #[error("playbook {id} produced a malformed result: {source}")]
    MalformedResult {
        /// Playbook that failed.
        id: String,
        /// Underlying parse error.
        #[source]
        source: ResultParseError,
    },
    /// Raised when the artifact omits `status` or a contractually required
    /// key, even though the script reported success.
    #[error("playbook {id} omitted required result keys: {}", keys.join(", "))]
    MissingKeys {
        /// Playbook that failed.
        id: String,
        /// Keys that were absent from the artifact.
        keys: Vec<String>,
    },
}
