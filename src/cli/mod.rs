//! Command-line interface definitions for the `steward` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `steward` binary.
#[derive(Debug, Parser)]
#[command(
    name = "steward",
    about = "Describe servers and sites declaratively and manage them over SSH",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision a cloud server and register it in the inventory.
    #[command(
        name = "provision",
        about = "Provision a cloud server and register it in the inventory"
    )]
    Provision(ProvisionCommand),
    /// Destroy a provisioned server and remove it from the inventory.
    #[command(
        name = "destroy",
        about = "Destroy a provisioned server and remove it from the inventory"
    )]
    Destroy(DestroyCommand),
    /// Run a playbook against a registered server.
    #[command(name = "run", about = "Run a playbook against a registered server")]
    Run(RunCommand),
    /// Probe a server and show its capability facts.
    #[command(name = "info", about = "Probe a server and show its capability facts")]
    Info(InfoCommand),
    /// List registered servers, sites, and available playbooks.
    #[command(
        name = "list",
        about = "List registered servers, sites, and available playbooks"
    )]
    List,
}

/// Arguments for the `steward provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Inventory name for the new server.
    pub(crate) name: String,
    /// Override the configured region for this server.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Override the configured size slug for this server.
    #[arg(long, value_name = "SIZE")]
    pub(crate) size: Option<String>,
    /// Override the configured image slug for this server.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Replace an existing inventory record with the same name.
    #[arg(long)]
    pub(crate) replace: bool,
}

/// Arguments for the `steward destroy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Inventory name of the server to destroy.
    pub(crate) name: String,
}

/// Arguments for the `steward run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Inventory name of the target server.
    pub(crate) server: String,
    /// Playbook identifier to execute.
    pub(crate) playbook: String,
    /// Playbook variable as NAME=VALUE. `true`/`false` become booleans,
    /// integers stay numeric, and a JSON array value becomes a record list.
    /// Repeatable.
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub(crate) vars: Vec<String>,
    /// Relay script progress lines as they arrive instead of staying silent.
    #[arg(long)]
    pub(crate) visible: bool,
}

/// Arguments for the `steward info` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct InfoCommand {
    /// Inventory name of the target server.
    pub(crate) server: String,
}
