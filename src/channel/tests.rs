//! Unit tests for the SSH channel.

use std::ffi::OsString;
use std::time::Duration;

use rstest::{fixture, rstest};

use crate::server::{Login, Server};
use crate::test_support::{EnvGuard, ScriptedRunner};

use super::{
    ChannelConfig, ChannelError, CommandRunner, ProcessCommandRunner, RunOptions, SshChannel,
};

#[fixture]
fn base_config() -> ChannelConfig {
    ChannelConfig {
        ssh_bin: String::from("ssh"),
        batch_mode: true,
        strict_host_key_checking: false,
        known_hosts_file: String::new(),
        connect_timeout_secs: 10,
    }
}

#[fixture]
fn server() -> Server {
    Server::new(
        String::from("web1"),
        String::from("203.0.113.7"),
        2222,
        Login {
            username: String::from("deploy"),
            identity_file: Some(String::from("/keys/id_ed25519")),
        },
    )
}

#[rstest]
fn execute_builds_expected_ssh_invocation(base_config: ChannelConfig, server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let channel = SshChannel::new(base_config, runner.clone())
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let output = channel
        .execute(&server, "echo ok", &RunOptions::default())
        .unwrap_or_else(|err| panic!("execute should succeed: {err}"));
    assert!(output.is_success());

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1, "expected a single ssh invocation");
    let invocation = invocations
        .first()
        .unwrap_or_else(|| panic!("expected a recorded invocation"));
    assert_eq!(invocation.program, "ssh");
    let rendered = invocation.command_string();
    for fragment in [
        "-p 2222",
        "-i /keys/id_ed25519",
        "BatchMode=yes",
        "StrictHostKeyChecking=no",
        "ConnectTimeout=10",
        "deploy@203.0.113.7",
    ] {
        assert!(
            rendered.contains(fragment),
            "expected '{fragment}' in: {rendered}"
        );
    }
    assert_eq!(
        invocation.args.last(),
        Some(&OsString::from("echo ok")),
        "remote command must be the final argument"
    );
    assert!(
        !rendered.contains("UserKnownHostsFile"),
        "blank known-hosts override must be omitted, got: {rendered}"
    );
}

#[rstest]
fn execute_passes_known_hosts_override(base_config: ChannelConfig, server: Server) {
    let config = ChannelConfig {
        known_hosts_file: String::from("/dev/null"),
        ..base_config
    };
    let runner = ScriptedRunner::new();
    runner.push_success();
    let channel = SshChannel::new(config, runner.clone())
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    channel
        .execute(&server, "true", &RunOptions::default())
        .unwrap_or_else(|err| panic!("execute should succeed: {err}"));

    let invocations = runner.invocations();
    let invocation = invocations
        .first()
        .unwrap_or_else(|| panic!("expected a recorded invocation"));
    assert!(
        invocation
            .command_string()
            .contains("UserKnownHostsFile=/dev/null"),
        "expected known-hosts override, got: {}",
        invocation.command_string()
    );
}

#[rstest]
fn execute_maps_exit_255_to_connection_error(base_config: ChannelConfig, server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "Permission denied (publickey).");
    let channel = SshChannel::new(base_config, runner)
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let err = channel
        .execute(&server, "true", &RunOptions::default())
        .expect_err("exit 255 must surface as a connection failure");
    assert!(
        matches!(
            err,
            ChannelError::Connection { ref host, ref stderr }
                if host == "203.0.113.7" && stderr.contains("Permission denied")
        ),
        "unexpected error: {err:?}"
    );
}

#[rstest]
fn execute_returns_non_zero_exit_codes(base_config: ChannelConfig, server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(7), "partial", "boom");
    let channel = SshChannel::new(base_config, runner)
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let output = channel
        .execute(&server, "false", &RunOptions::default())
        .unwrap_or_else(|err| panic!("non-zero exit is not a channel error: {err}"));
    assert_eq!(output.exit_code, Some(7));
    assert_eq!(output.stdout, "partial");
    assert_eq!(output.stderr, "boom");
}

#[rstest]
fn execute_forwards_stdin_payload(base_config: ChannelConfig, server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let channel = SshChannel::new(base_config, runner.clone())
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let options = RunOptions {
        stdin: Some(String::from("echo payload\n")),
        ..RunOptions::default()
    };
    channel
        .execute(&server, "sh -s", &options)
        .unwrap_or_else(|err| panic!("execute should succeed: {err}"));

    let invocations = runner.invocations();
    let invocation = invocations
        .first()
        .unwrap_or_else(|| panic!("expected a recorded invocation"));
    assert_eq!(
        invocation.options.stdin.as_deref(),
        Some("echo payload\n"),
        "stdin payload must reach the runner"
    );
}

#[rstest]
#[case("", "ssh_bin")]
#[case("   ", "ssh_bin")]
fn config_rejects_blank_ssh_bin(
    base_config: ChannelConfig,
    #[case] ssh_bin: &str,
    #[case] field: &str,
) {
    let config = ChannelConfig {
        ssh_bin: ssh_bin.to_owned(),
        ..base_config
    };
    let err = config.validate().expect_err("blank ssh_bin must fail");
    assert!(
        matches!(err, ChannelError::InvalidConfig { field: ref f } if f == field),
        "unexpected error: {err:?}"
    );
}

#[rstest]
fn config_rejects_zero_connect_timeout(base_config: ChannelConfig) {
    let config = ChannelConfig {
        connect_timeout_secs: 0,
        ..base_config
    };
    let err = config
        .validate()
        .expect_err("zero connect timeout must fail");
    assert!(matches!(err, ChannelError::InvalidConfig { .. }));
}

#[tokio::test]
async fn config_loads_overrides_from_environment() {
    let _guard = EnvGuard::set_vars(&[
        ("STEWARD_SSH_SSH_BIN", "/usr/local/bin/ssh"),
        ("STEWARD_SSH_CONNECT_TIMEOUT_SECS", "5"),
    ])
    .await;

    let config = ChannelConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));
    assert_eq!(config.ssh_bin, "/usr/local/bin/ssh");
    assert_eq!(config.connect_timeout_secs, 5);
    assert!(config.batch_mode, "defaults apply where the env is silent");
}

#[test]
fn process_runner_captures_output_and_exit_code() {
    let runner = ProcessCommandRunner;
    let args = vec![
        OsString::from("-c"),
        OsString::from("echo out; echo err >&2; exit 3"),
    ];
    let output = runner
        .run("sh", &args, &RunOptions::default())
        .unwrap_or_else(|err| panic!("sh should spawn: {err}"));

    assert_eq!(output.code, Some(3));
    assert_eq!(output.stdout, "out\n");
    assert_eq!(output.stderr, "err\n");
}

#[test]
fn process_runner_feeds_stdin_payload() {
    let runner = ProcessCommandRunner;
    let options = RunOptions {
        stdin: Some(String::from("echo from-stdin\n")),
        ..RunOptions::default()
    };
    let output = runner
        .run("sh", &[OsString::from("-s")], &options)
        .unwrap_or_else(|err| panic!("sh should spawn: {err}"));

    assert_eq!(output.code, Some(0));
    assert_eq!(output.stdout, "from-stdin\n");
}

#[test]
fn process_runner_kills_on_deadline() {
    let runner = ProcessCommandRunner;
    let options = RunOptions {
        timeout: Some(Duration::from_millis(50)),
        ..RunOptions::default()
    };
    let err = runner
        .run(
            "sh",
            &[OsString::from("-c"), OsString::from("sleep 5")],
            &options,
        )
        .expect_err("expected a timeout");
    assert!(
        matches!(err, ChannelError::Timeout { ref program, .. } if program == "sh"),
        "unexpected error: {err:?}"
    );
}

#[test]
fn process_runner_reports_unknown_binary_as_spawn_error() {
    let runner = ProcessCommandRunner;
    let err = runner
        .run(
            "steward-definitely-not-a-binary",
            &[],
            &RunOptions::default(),
        )
        .expect_err("unknown binary must fail to spawn");
    assert!(matches!(err, ChannelError::Spawn { .. }));
}
