//! Behavioural tests for the playbook contract through the public API.
//!
//! The result artifact is the authoritative success signal: these scenarios
//! pin the contract boundaries — exit codes alone never suffice, required
//! keys are enforced even when a script reports success, and the capability
//! cache probes a server at most once per command run.

use rstest::{fixture, rstest};

use steward::test_support::ScriptedRunner;
use steward::{
    ChannelConfig, Login, Mode, PlaybookEngine, PlaybookError, Privilege, Server, SshChannel,
    VarBag, ensure_info,
};

const SETUP_ARTIFACT: &str = concat!(
    "status: success\n",
    "root_pass: 6e1f8e0a\n",
    "deployer_pass: 9c2d4b7e\n",
);

#[fixture]
fn server() -> Server {
    Server::new(
        String::from("web1"),
        String::from("203.0.113.7"),
        22,
        Login {
            username: String::from("root"),
            identity_file: Some(String::from("~/.ssh/id_ed25519")),
        },
    )
}

fn engine(runner: &ScriptedRunner) -> PlaybookEngine<ScriptedRunner> {
    let config = ChannelConfig {
        ssh_bin: String::from("ssh"),
        batch_mode: true,
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
        connect_timeout_secs: 10,
    };
    let channel = SshChannel::new(config, runner.clone())
        .unwrap_or_else(|err| panic!("config should validate: {err}"));
    PlaybookEngine::new(channel)
}

#[rstest]
fn install_playbook_returns_generated_credentials(server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(Some(0), SETUP_ARTIFACT, "");

    let result = engine(&runner)
        .run(&server, "server-setup", &VarBag::new(), Mode::Silent)
        .unwrap_or_else(|err| panic!("setup should succeed: {err}"));

    assert_eq!(result.status(), "success");
    assert_eq!(result.scalar("root_pass"), Some("6e1f8e0a"));
    assert_eq!(result.scalar("deployer_pass"), Some("9c2d4b7e"));
}

#[rstest]
fn install_playbook_without_credentials_fails_despite_reported_success(server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(Some(0), "status: success\n", "");

    let err = engine(&runner)
        .run(&server, "server-setup", &VarBag::new(), Mode::Silent)
        .expect_err("missing credentials must fail the whole operation");

    assert!(
        matches!(err, PlaybookError::MissingKeys { ref keys, .. }
            if keys == &[String::from("root_pass"), String::from("deployer_pass")]),
        "unexpected error: {err:?}"
    );
}

#[rstest]
fn exit_zero_without_artifact_always_fails(server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(Some(1), "", "cat: no such file");

    let err = engine(&runner)
        .run(&server, "site-create", &VarBag::new(), Mode::Silent)
        .expect_err("exit code alone is never sufficient");
    assert!(matches!(err, PlaybookError::MissingArtifact { .. }));
}

#[rstest]
fn non_zero_exit_always_fails(server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(2), "", "DOMAIN variable is required");

    let err = engine(&runner)
        .run(&server, "site-create", &VarBag::new(), Mode::Silent)
        .expect_err("non-zero exit must fail regardless of artifact contents");
    assert!(
        matches!(err, PlaybookError::ScriptFailure { ref detail, .. }
            if detail == "DOMAIN variable is required"),
        "unexpected error: {err:?}"
    );
}

#[rstest]
fn record_list_variables_reach_the_payload_as_json(server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(Some(0), "status: success\ninstalled: 1\n", "");

    let mut vars = VarBag::new();
    vars.set_json(
        "jobs",
        &serde_json::json!([{"script": "a.sh", "schedule": "* * * * *"}]),
    )
    .unwrap_or_else(|err| panic!("set jobs: {err}"));

    engine(&runner)
        .run(&server, "cron-sync", &vars, Mode::Silent)
        .unwrap_or_else(|err| panic!("cron-sync should succeed: {err}"));

    let invocations = runner.invocations();
    let payload = invocations
        .first()
        .and_then(|invocation| invocation.stdin().map(ToOwned::to_owned))
        .unwrap_or_else(|| panic!("execution must stream a payload"));
    let export = payload
        .lines()
        .find(|line| line.starts_with("export JOBS="))
        .unwrap_or_else(|| panic!("payload must export JOBS, got: {payload}"));
    assert!(
        export.contains("\"script\":\"a.sh\""),
        "JOBS must carry the records as JSON, got: {export}"
    );
}

#[rstest]
fn capability_cache_probes_once_and_gates_later_playbooks(mut server: Server) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(
        Some(0),
        "status: success\ndistro: debian\npermissions: root\n",
        "",
    );

    let engine = engine(&runner);
    let info = ensure_info(&engine, &mut server)
        .unwrap_or_else(|err| panic!("probe should validate: {err}"));
    assert_eq!(info.distro(), "debian");
    assert_eq!(info.permissions(), Privilege::Root);

    ensure_info(&engine, &mut server)
        .unwrap_or_else(|err| panic!("second call must not probe again: {err}"));
    assert_eq!(
        runner.invocation_count(),
        2,
        "exactly one probe (execution plus fetch) per command run"
    );

    // Later playbooks receive the cached facts as control variables.
    runner.push_success();
    runner.push_output(Some(0), "status: success\ndomain: example.com\ncreated: true\n", "");
    let mut vars = VarBag::new();
    vars.set_text("domain", "example.com")
        .unwrap_or_else(|err| panic!("set domain: {err}"));
    engine
        .run(&server, "site-create", &vars, Mode::Silent)
        .unwrap_or_else(|err| panic!("site-create should succeed: {err}"));

    let invocations = runner.invocations();
    let payload = invocations
        .get(2)
        .and_then(|invocation| invocation.stdin().map(ToOwned::to_owned))
        .unwrap_or_else(|| panic!("execution must stream a payload"));
    assert!(payload.contains("export DISTRO=debian"));
    assert!(payload.contains("export PERMISSIONS=root"));
}
