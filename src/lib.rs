//! Core library for the Steward server management tool.
//!
//! The crate implements the remote execution and provisioning orchestration
//! layer: an SSH command channel, a typed variable marshaler, a playbook
//! runner that enforces a structured result contract against free-form
//! script output, a per-run server capability cache, and a provisioning
//! state machine that drives a cloud instance from creation to a verified,
//! registered server. Servers and sites are persisted by the inventory
//! store; the orchestration core only borrows them.

pub mod channel;
pub mod config;
pub mod facts;
pub mod inventory;
pub mod playbook;
pub mod provider;
pub mod provision;
pub mod server;
pub mod test_support;
pub mod vars;

pub use channel::{
    ChannelConfig, ChannelError, CommandOutput, CommandRunner, ProcessCommandRunner,
    RemoteCommandOutput, RunOptions, SshChannel,
};
pub use config::{ConfigError, DigitalOceanConfig};
pub use facts::{FactsError, SUPPORTED_DISTROS, ensure_info};
pub use inventory::{Inventory, InventoryError, InventoryStore, Site};
pub use playbook::{Mode, PlaybookEngine, PlaybookError, PlaybookResult, ResultDoc, ResultValue};
pub use provider::{
    DigitalOceanError, DigitalOceanProvider, InstanceHandle, InstanceSnapshot, InstanceSpec,
    Provider,
};
pub use provision::{Clock, ProvisionError, ProvisionState, Provisioner, TokioClock};
pub use server::{Login, Privilege, Server, ServerInfo};
pub use vars::{MarshalError, Record, Scalar, ScriptValue, VarBag, marshal};
