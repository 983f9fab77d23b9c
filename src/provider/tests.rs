//! Unit tests for the local and SSH providers.

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::test_support::{CommandInvocation, ScriptedRunner};

#[fixture]
fn tooling() -> ProviderTooling {
    ProviderTooling::default()
}

#[fixture]
fn ssh_config() -> SshProviderConfig {
    SshProviderConfig {
        name: String::from("edge1"),
        enabled: true,
        host: String::from("10.0.0.5"),
        port: 22,
        username: String::from("ops"),
        password: None,
        private_key_path: Some(String::from("/keys/id_ed25519")),
        known_hosts: KnownHostsPolicy::Accept,
    }
}

fn local_provider(runner: ScriptedRunner, tooling: ProviderTooling) -> LocalProvider<ScriptedRunner> {
    LocalProvider::new(
        LocalProviderConfig {
            name: String::from("local"),
            enabled: true,
        },
        tooling,
        runner,
    )
}

#[rstest]
#[tokio::test]
async fn local_execute_splits_program_and_args(tooling: ProviderTooling) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let provider = local_provider(runner.clone(), tooling);

    let command = [String::from("echo"), String::from("ok")];
    let output = provider
        .execute_command(&command, Some(Utf8Path::new("/work")))
        .await
        .expect("execution should succeed");

    assert!(output.is_success());
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].program, "echo");
    assert_eq!(invocations[0].cwd.as_deref(), Some("/work"));
}

#[rstest]
#[tokio::test]
async fn local_empty_command_is_a_transport_error(tooling: ProviderTooling) {
    let provider = local_provider(ScriptedRunner::new(), tooling);

    let err = provider
        .execute_command(&[], None)
        .await
        .expect_err("empty command should be rejected");

    assert!(matches!(err, ProviderError::Transport { .. }));
}

#[rstest]
#[tokio::test]
async fn local_unspawnable_command_yields_typed_transport_failure(tooling: ProviderTooling) {
    // No scripted response queued: the runner reports a spawn failure.
    let provider = local_provider(ScriptedRunner::new(), tooling);

    let command = [String::from("missing-tool")];
    let err = provider
        .execute_command(&command, None)
        .await
        .expect_err("spawn failure should surface as a transport error");

    let ProviderError::Transport { message } = err else {
        panic!("expected a transport error, got {err:?}");
    };
    assert!(!message.is_empty());
}

#[rstest]
#[tokio::test]
async fn local_upload_copies_within_the_filesystem(tooling: ProviderTooling) {
    let provider = local_provider(ScriptedRunner::new(), tooling);
    let dir = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp path");
    let source = root.join("lab.clab.yml");
    let dest = root.join("staged.clab.yml");
    std::fs::write(&source, "name: demo\n").expect("write source");

    provider
        .upload_file(&source, &dest)
        .await
        .expect("copy should succeed");

    let copied = std::fs::read_to_string(&dest).expect("read copy");
    assert_eq!(copied, "name: demo\n");
}

#[rstest]
#[tokio::test]
async fn local_upload_failure_is_a_transfer_error(tooling: ProviderTooling) {
    let provider = local_provider(ScriptedRunner::new(), tooling);

    let err = provider
        .upload_file(
            Utf8Path::new("/nonexistent/source.yml"),
            Utf8Path::new("/nonexistent/dest.yml"),
        )
        .await
        .expect_err("missing source should fail");

    assert!(matches!(err, ProviderError::Transfer { .. }));
}

#[rstest]
#[tokio::test]
async fn health_is_docker_and_containerlab(tooling: ProviderTooling) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_exit_code(127);
    let provider = local_provider(runner, tooling);

    let report = provider.check_health().await;

    assert!(report.docker_available);
    assert!(!report.containerlab_available);
    assert!(!report.healthy);
    assert!(report.error.is_none());
}

#[rstest]
#[tokio::test]
async fn health_is_idempotent_without_state_changes(tooling: ProviderTooling) {
    let runner = ScriptedRunner::new();
    for _ in 0..4 {
        runner.push_success();
    }
    let provider = local_provider(runner, tooling);

    let first = provider.check_health().await;
    let second = provider.check_health().await;

    assert_eq!(first.healthy, second.healthy);
    assert!(first.healthy);
}

#[rstest]
#[tokio::test]
async fn health_probe_transport_failure_is_reported_not_raised(tooling: ProviderTooling) {
    // Empty script queue: both probes fail to spawn.
    let provider = local_provider(ScriptedRunner::new(), tooling);

    let report = provider.check_health().await;

    assert!(!report.healthy);
    assert!(report.error.is_some());
}

#[rstest]
#[tokio::test]
async fn ssh_opens_the_control_master_once(
    ssh_config: SshProviderConfig,
    tooling: ProviderTooling,
) {
    let runner = ScriptedRunner::new();
    runner.push_success(); // master
    runner.push_success(); // first command
    runner.push_success(); // second command
    let provider = SshProvider::new(ssh_config, tooling, runner.clone());

    let command = [String::from("uname")];
    provider
        .execute_command(&command, None)
        .await
        .expect("first command should succeed");
    provider
        .execute_command(&command, None)
        .await
        .expect("second command should succeed");

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 3);
    let master = invocations[0].command_string();
    assert!(master.contains("-M"), "first call should open the master: {master}");
    assert!(master.contains("ControlPath="), "master should pin the control socket: {master}");
    assert!(master.ends_with("ops@10.0.0.5"), "master connects without a command: {master}");
    assert!(
        !invocations[1].command_string().contains("-M"),
        "subsequent calls must reuse the master"
    );
}

#[rstest]
#[tokio::test]
async fn ssh_wraps_commands_with_a_directory_change(
    ssh_config: SshProviderConfig,
    tooling: ProviderTooling,
) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    let provider = SshProvider::new(ssh_config, tooling, runner.clone());

    let command = [String::from("ls"), String::from("a b")];
    provider
        .execute_command(&command, Some(Utf8Path::new("/labs")))
        .await
        .expect("command should succeed");

    let exec = runner.invocations().pop().expect("exec invocation");
    let remote = exec.args.last().expect("remote command argument");
    assert_eq!(remote.to_string_lossy(), "cd /labs && ls 'a b'");
}

#[rstest]
#[tokio::test]
async fn ssh_key_auth_forces_batch_mode(ssh_config: SshProviderConfig, tooling: ProviderTooling) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    let provider = SshProvider::new(ssh_config, tooling, runner.clone());

    let command = [String::from("true")];
    provider
        .execute_command(&command, None)
        .await
        .expect("command should succeed");

    let master = runner.invocations().first().map(CommandInvocation::command_string);
    let master = master.expect("master invocation");
    assert!(master.contains("BatchMode=yes"));
    assert!(master.contains("-i /keys/id_ed25519"));
}

#[rstest]
#[tokio::test]
async fn ssh_password_auth_shells_through_sshpass(
    mut ssh_config: SshProviderConfig,
    tooling: ProviderTooling,
) {
    ssh_config.password = Some(String::from("secret"));
    ssh_config.private_key_path = None;
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    let provider = SshProvider::new(ssh_config, tooling, runner.clone());

    let command = [String::from("true")];
    provider
        .execute_command(&command, None)
        .await
        .expect("command should succeed");

    let master = runner.invocations().first().cloned().expect("master invocation");
    assert_eq!(master.program, "sshpass");
    let rendered = master.command_string();
    assert!(rendered.starts_with("sshpass -p secret ssh"), "got: {rendered}");
    assert!(
        !rendered.contains("BatchMode"),
        "password auth must leave batch mode off: {rendered}"
    );
}

#[rstest]
#[tokio::test]
async fn ssh_connect_failure_is_a_typed_transport_error(
    ssh_config: SshProviderConfig,
    tooling: ProviderTooling,
) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "Connection refused");
    let provider = SshProvider::new(ssh_config, tooling, runner);

    let command = [String::from("true")];
    let err = provider
        .execute_command(&command, None)
        .await
        .expect_err("unreachable host should fail");

    let ProviderError::Transport { message } = err else {
        panic!("expected a transport error, got {err:?}");
    };
    assert!(message.contains("Connection refused"), "got: {message}");
}

#[rstest]
#[tokio::test]
async fn ssh_missing_exit_status_counts_as_failure(
    ssh_config: SshProviderConfig,
    tooling: ProviderTooling,
) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_missing_exit_code();
    let provider = SshProvider::new(ssh_config, tooling, runner);

    let command = [String::from("true")];
    let output = provider
        .execute_command(&command, None)
        .await
        .expect("transport itself succeeded");

    assert!(!output.is_success());
}

#[rstest]
#[tokio::test]
async fn ssh_upload_rides_the_shared_master(
    ssh_config: SshProviderConfig,
    tooling: ProviderTooling,
) {
    let runner = ScriptedRunner::new();
    runner.push_success(); // master
    runner.push_success(); // scp
    let provider = SshProvider::new(ssh_config, tooling, runner.clone());

    provider
        .upload_file(Utf8Path::new("/labs/demo.clab.yml"), Utf8Path::new("/tmp/demo.clab.yml"))
        .await
        .expect("upload should succeed");

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[1].program, "scp");
    let rendered = invocations[1].command_string();
    assert!(rendered.contains("ControlPath="), "scp must reuse the master: {rendered}");
    assert!(rendered.ends_with("/labs/demo.clab.yml ops@10.0.0.5:/tmp/demo.clab.yml"), "got: {rendered}");
}

#[rstest]
#[tokio::test]
async fn ssh_failed_transfer_is_a_transfer_error(
    ssh_config: SshProviderConfig,
    tooling: ProviderTooling,
) {
    let runner = ScriptedRunner::new();
    runner.push_success(); // master
    runner.push_output(Some(1), "", "scp: permission denied");
    let provider = SshProvider::new(ssh_config, tooling, runner);

    let err = provider
        .download_file(Utf8Path::new("/tmp/demo.clab.yml"), Utf8Path::new("/labs/demo.clab.yml"))
        .await
        .expect_err("failed copy should surface");

    let ProviderError::Transfer { message, .. } = err else {
        panic!("expected a transfer error, got {err:?}");
    };
    assert!(message.contains("permission denied"));
}

#[rstest]
#[tokio::test]
async fn ssh_close_is_idempotent(ssh_config: SshProviderConfig, tooling: ProviderTooling) {
    let runner = ScriptedRunner::new();
    let provider = SshProvider::new(ssh_config, tooling, runner.clone());

    // Never connected: close must not touch the transport.
    provider.close().await;
    assert!(runner.invocations().is_empty());

    runner.push_success(); // master
    runner.push_success(); // command
    runner.push_success(); // -O exit
    let command = [String::from("true")];
    provider
        .execute_command(&command, None)
        .await
        .expect("command should succeed");
    provider.close().await;

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 3);
    let teardown = invocations[2].command_string();
    assert!(teardown.contains("-O exit"), "got: {teardown}");

    // Second close after teardown is a no-op.
    provider.close().await;
    assert_eq!(runner.invocations().len(), 3);
}

#[rstest]
fn ssh_config_requires_a_credential(mut ssh_config: SshProviderConfig) {
    ssh_config.password = None;
    ssh_config.private_key_path = None;
    let config = ProviderConfig::Ssh(ssh_config);

    let err = config.validate().expect_err("credential-less config should fail");
    assert!(matches!(err, ProviderConfigError::MissingCredentials { .. }));
}

#[rstest]
fn provider_config_round_trips_through_its_tag(ssh_config: SshProviderConfig) {
    let config = ProviderConfig::Ssh(ssh_config);
    let rendered = serde_json::to_string(&config).expect("serialize");
    assert!(rendered.contains("\"type\":\"ssh\""));

    let parsed: ProviderConfig = serde_json::from_str(&rendered).expect("deserialize");
    assert_eq!(parsed, config);
    assert_eq!(parsed.kind(), ProviderKind::Ssh);
}

#[test]
fn unknown_provider_type_fails_at_deserialization() {
    let raw = r#"{"type":"docker","name":"x","enabled":true}"#;
    let parsed: Result<ProviderConfig, _> = serde_json::from_str(raw);
    assert!(parsed.is_err());
}
