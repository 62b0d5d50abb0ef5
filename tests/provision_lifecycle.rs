//! Behavioural tests for the provisioning lifecycle through the public API.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use steward::provider::NetworkAddress;
use steward::test_support::{FakeProvider, ManualClock, ScriptedRunner};
use steward::{
    ChannelConfig, InstanceHandle, InstanceSpec, Login, PlaybookEngine, ProvisionError,
    Provisioner, SshChannel,
};

const PROBE_ARTIFACT: &str = "status: success\ndistro: ubuntu\npermissions: sudo\n";

fn spec() -> InstanceSpec {
    InstanceSpec::builder()
        .name("steward-app1")
        .region("fra1")
        .size("s-2vcpu-4gb")
        .image("ubuntu-24-04-x64")
        .ssh_keys(vec![String::from("ab:cd")])
        .monitoring(true)
        .build()
        .unwrap_or_else(|err| panic!("spec should build: {err}"))
}

fn login() -> Login {
    Login {
        username: String::from("root"),
        identity_file: Some(String::from("~/.ssh/id_ed25519")),
    }
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

#[tokio::test]
async fn provisioned_server_is_registered_with_probed_facts() {
    let provider = FakeProvider::new("2002")
        .with_resting_status("active")
        .with_addresses(vec![NetworkAddress {
            address: Ipv4Addr::new(198, 51, 100, 23),
            public: true,
        }]);
    provider.push_status("new");
    provider.push_status("active");

    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    runner.push_output(Some(0), PROBE_ARTIFACT, "");

    let clock = ManualClock::new();
    let provisioner = Provisioner::new(provider, engine(&runner))
        .with_poll_interval(Duration::from_secs(2))
        .with_wait_timeout(Duration::from_secs(300))
        .with_ssh_retry(5, Duration::from_secs(5))
        .with_clock(Arc::new(clock));

    let server = provisioner
        .provision("app1", &spec(), &login())
        .await
        .unwrap_or_else(|err| panic!("provision should succeed: {err}"));

    assert_eq!(server.host, "198.51.100.23");
    assert_eq!(server.provider.as_deref(), Some("fake"));
    assert_eq!(server.instance_id.as_deref(), Some("2002"));
    assert_eq!(
        server.info.as_ref().map(|info| info.distro().to_owned()),
        Some(String::from("ubuntu"))
    );
}

#[tokio::test]
async fn stuck_instance_times_out_without_automatic_cleanup() {
    let provider = FakeProvider::new("2002").with_resting_status("new");
    let runner = ScriptedRunner::new();
    let clock = ManualClock::new();
    let provisioner = Provisioner::new(provider.clone(), engine(&runner))
        .with_poll_interval(Duration::from_secs(2))
        .with_wait_timeout(Duration::from_secs(6))
        .with_clock(Arc::new(clock));

    let err = provisioner
        .provision("app1", &spec(), &login())
        .await
        .expect_err("stuck instance must time out");

    assert!(matches!(err, ProvisionError::TimedOut { .. }));
    assert!(
        provider.destroyed().is_empty(),
        "timeout must not destroy anything automatically; cleanup is the caller's call"
    );
}

#[tokio::test]
async fn repeated_destroy_of_a_missing_instance_succeeds() {
    let provider = FakeProvider::new("2002");
    let runner = ScriptedRunner::new();
    let provisioner = Provisioner::new(provider.clone(), engine(&runner));
    let handle = InstanceHandle {
        id: String::from("2002"),
    };

    for _ in 0..3 {
        provisioner
            .destroy(&handle)
            .await
            .unwrap_or_else(|err| panic!("destroy must stay idempotent: {err}"));
    }
    assert_eq!(provider.destroyed().len(), 3);
}
