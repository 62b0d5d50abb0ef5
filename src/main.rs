//! Binary entry point for the Steward CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;

use steward::provider::Provider;
use steward::{
    ChannelConfig, ChannelError, DigitalOceanConfig, DigitalOceanError, DigitalOceanProvider,
    FactsError, InstanceHandle, Inventory, InventoryError, InventoryStore, MarshalError, Mode,
    PlaybookEngine, PlaybookError, ProcessCommandRunner, ProvisionError, Provisioner, ResultDoc,
    ResultValue, SshChannel, VarBag, ensure_info, playbook,
};

mod cli;

use cli::{Cli, DestroyCommand, InfoCommand, ProvisionCommand, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),
    #[error("ssh error: {0}")]
    Channel(#[from] ChannelError),
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error(transparent)]
    Playbook(#[from] PlaybookError),
    #[error(transparent)]
    Facts(#[from] FactsError),
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError<DigitalOceanError>),
    #[error("provider error: {0}")]
    Provider(#[from] DigitalOceanError),
    #[error("invalid --var assignment: {0}")]
    InvalidVar(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Provision(args) => provision_command(args).await,
        Cli::Destroy(args) => destroy_command(args).await,
        Cli::Run(args) => run_command(&args),
        Cli::Info(args) => info_command(&args),
        Cli::List => list_command(),
    }
}

async fn provision_command(args: ProvisionCommand) -> Result<i32, CliError> {
    let provider_config = DigitalOceanConfig::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let channel_config =
        ChannelConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;

    let inventory = Inventory::new();
    if !args.replace && inventory.get_server(&args.name)?.is_some() {
        return Err(CliError::Inventory(InventoryError::ServerExists {
            name: args.name,
        }));
    }

    let provider = DigitalOceanProvider::new(&provider_config)?;
    let channel = SshChannel::with_process_runner(channel_config)?;
    let engine = PlaybookEngine::new(channel);

    let mut spec = provider_config
        .as_spec(&format!("steward-{}", args.name))
        .map_err(|err| CliError::Config(err.to_string()))?;
    if let Some(region) = args.region {
        spec.region = region;
    }
    if let Some(size) = args.size {
        spec.size = size;
    }
    if let Some(image) = args.image {
        spec.image = image;
    }

    let provisioner = Provisioner::new(provider, engine);
    let server = provisioner
        .provision(&args.name, &spec, &provider_config.login())
        .await?;
    inventory.upsert_server(&server, args.replace)?;

    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "registered {} at {} (instance {})",
        server.name,
        server.host,
        server.instance_id.as_deref().unwrap_or("unknown")
    )
    .ok();
    Ok(0)
}

async fn destroy_command(args: DestroyCommand) -> Result<i32, CliError> {
    let inventory = Inventory::new();
    let server = inventory
        .get_server(&args.name)?
        .ok_or_else(|| CliError::UnknownServer(args.name.clone()))?;

    if let Some(instance_id) = &server.instance_id {
        let provider_config = DigitalOceanConfig::load_without_cli_args()
            .map_err(|err| CliError::Config(err.to_string()))?;
        let provider = DigitalOceanProvider::new(&provider_config)?;
        let handle = InstanceHandle {
            id: instance_id.clone(),
        };
        provider.destroy_instance(&handle).await?;
    }

    inventory.remove_server(&args.name)?;
    let mut stdout = io::stdout();
    writeln!(stdout, "destroyed {}", args.name).ok();
    Ok(0)
}

fn run_command(args: &RunCommand) -> Result<i32, CliError> {
    let vars = parse_var_assignments(&args.vars)?;
    let (inventory, engine) = open_engine()?;
    let mut server = inventory
        .get_server(&args.server)?
        .ok_or_else(|| CliError::UnknownServer(args.server.clone()))?;

    ensure_info(&engine, &mut server)?;
    let mode = if args.visible {
        Mode::Visible
    } else {
        Mode::Silent
    };
    let result = engine.run(&server, &args.playbook, &vars, mode)?;

    write_doc(io::stdout(), result.doc());
    Ok(0)
}

fn info_command(args: &InfoCommand) -> Result<i32, CliError> {
    let (inventory, engine) = open_engine()?;
    let mut server = inventory
        .get_server(&args.server)?
        .ok_or_else(|| CliError::UnknownServer(args.server.clone()))?;

    let info = ensure_info(&engine, &mut server)?;
    write_doc(io::stdout(), info.facts());
    Ok(0)
}

fn list_command() -> Result<i32, CliError> {
    let inventory = Inventory::new();
    let mut stdout = io::stdout();

    for server in inventory.list_servers()? {
        writeln!(
            stdout,
            "server {} {}@{}:{}",
            server.name, server.username, server.host, server.port
        )
        .ok();
    }
    for site in inventory.list_sites()? {
        writeln!(stdout, "site {} on {}", site.domain, site.server).ok();
    }
    for asset in playbook::assets::all() {
        writeln!(stdout, "playbook {}: {}", asset.id, asset.summary).ok();
    }
    Ok(0)
}

fn open_engine() -> Result<(Inventory, PlaybookEngine<ProcessCommandRunner>), CliError> {
    let channel_config =
        ChannelConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let channel = SshChannel::with_process_runner(channel_config)?;
    Ok((Inventory::new(), PlaybookEngine::new(channel)))
}

fn parse_var_assignments(assignments: &[String]) -> Result<VarBag, CliError> {
    let mut bag = VarBag::new();
    for assignment in assignments {
        let (name, raw) = assignment.split_once('=').ok_or_else(|| {
            CliError::InvalidVar(format!("{assignment} (expected NAME=VALUE)"))
        })?;
        set_typed_var(&mut bag, name, raw).map_err(|err| CliError::InvalidVar(err.to_string()))?;
    }
    Ok(bag)
}

fn set_typed_var(bag: &mut VarBag, name: &str, raw: &str) -> Result<(), MarshalError> {
    if raw == "true" || raw == "false" {
        return bag.set_bool(name, raw == "true");
    }
    if let Ok(number) = raw.parse::<i64>() {
        return bag.set_int(name, number);
    }
    if raw.trim_start().starts_with('[') {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|err| MarshalError::Unrepresentable {
                name: name.to_owned(),
                detail: err.to_string(),
            })?;
        return bag.set_json(name, &value);
    }
    bag.set_text(name, raw)
}

fn write_doc(mut target: impl Write, doc: &ResultDoc) {
    for (key, value) in doc.iter() {
        match value {
            ResultValue::Scalar(text) => {
                writeln!(target, "{key}: {text}").ok();
            }
            ResultValue::Map(entries) => {
                writeln!(target, "{key}:").ok();
                for (entry_key, entry_value) in entries {
                    writeln!(target, "  {entry_key}: {entry_value}").ok();
                }
            }
        }
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use steward::ScriptValue;

    use super::*;

    #[test]
    fn parse_var_assignments_types_values() {
        let assignments = vec![
            String::from("count=3"),
            String::from("enabled=true"),
            String::from("name=web server"),
            String::from(r#"jobs=[{"script":"a.sh","schedule":"* * * * *"}]"#),
        ];
        let bag = parse_var_assignments(&assignments)
            .unwrap_or_else(|err| panic!("assignments should parse: {err}"));

        assert_eq!(bag.get("count"), Some(&ScriptValue::Int(3)));
        assert_eq!(bag.get("enabled"), Some(&ScriptValue::Bool(true)));
        assert_eq!(
            bag.get("name"),
            Some(&ScriptValue::Text(String::from("web server")))
        );
        assert!(matches!(bag.get("jobs"), Some(&ScriptValue::Records(_))));
    }

    #[test]
    fn parse_var_assignments_rejects_missing_equals() {
        let err = parse_var_assignments(&[String::from("broken")])
            .expect_err("missing equals must fail");
        assert!(matches!(err, CliError::InvalidVar(_)));
    }

    #[test]
    fn parse_var_assignments_rejects_bad_json_lists() {
        let err = parse_var_assignments(&[String::from("jobs=[{broken")])
            .expect_err("bad json must fail");
        assert!(matches!(err, CliError::InvalidVar(_)));
    }

    #[test]
    fn write_doc_renders_scalars_and_maps() {
        let doc = ResultDoc::parse("status: success\nservices:\n  nginx: enabled\n")
            .unwrap_or_else(|err| panic!("parse: {err}"));
        let mut buf = Vec::new();
        write_doc(&mut buf, &doc);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(rendered, "status: success\nservices:\n  nginx: enabled\n");
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::UnknownServer(String::from("web1"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(
            rendered.contains("unknown server: web1"),
            "rendered: {rendered}"
        );
    }
}
