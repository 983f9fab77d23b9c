//! Unit tests for the provider factory.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::provider::SshProviderConfig;
use crate::test_support::ScriptedRunner;

struct FactoryFixture {
    factory: ProviderFactory<ScriptedRunner>,
    runner: ScriptedRunner,
    settings_path: Utf8PathBuf,
    _dir: TempDir,
}

#[fixture]
fn fresh_factory() -> FactoryFixture {
    let dir = TempDir::new().expect("temp dir");
    let settings_path =
        Utf8PathBuf::from_path_buf(dir.path().join("providers.json")).expect("utf8 temp path");
    let runner = ScriptedRunner::new();
    let factory = ProviderFactory::with_runner(
        settings_path.clone(),
        ProviderTooling::default(),
        runner.clone(),
    )
    .expect("factory should bootstrap");
    FactoryFixture {
        factory,
        runner,
        settings_path,
        _dir: dir,
    }
}

fn edge_config(name: &str) -> ProviderConfig {
    ProviderConfig::Ssh(SshProviderConfig {
        name: name.to_owned(),
        enabled: true,
        host: String::from("10.0.0.5"),
        port: 22,
        username: String::from("ops"),
        password: Some(String::from("x")),
        private_key_path: None,
        known_hosts: Default::default(),
    })
}

#[rstest]
fn bootstrap_creates_exactly_one_local_default(fresh_factory: FactoryFixture) {
    let summaries = fresh_factory.factory.list_providers();

    assert_eq!(summaries.len(), 1);
    let summary = summaries.first().expect("one summary");
    assert_eq!(summary.name, "local");
    assert_eq!(summary.kind, ProviderKind::Local);
    assert!(summary.is_default);
    assert!(summary.enabled);
    assert_eq!(fresh_factory.factory.default_provider_name(), "local");
}

#[rstest]
fn unnamed_lookup_returns_the_default(fresh_factory: FactoryFixture) {
    let provider = fresh_factory
        .factory
        .get_provider(None)
        .expect("default provider should resolve");
    assert_eq!(provider.name(), "local");
}

#[rstest]
fn unknown_lookup_returns_none(fresh_factory: FactoryFixture) {
    assert!(fresh_factory.factory.get_provider(Some("missing")).is_none());
}

#[rstest]
fn bootstrap_persists_the_settings_document(fresh_factory: FactoryFixture) {
    let contents =
        std::fs::read_to_string(&fresh_factory.settings_path).expect("settings file exists");
    let settings: ProviderSettings = serde_json::from_str(&contents).expect("settings parse");

    assert_eq!(settings.default_provider, "local");
    assert_eq!(settings.providers.len(), 1);
}

#[rstest]
fn add_provider_rejects_duplicates(fresh_factory: FactoryFixture) {
    let mut fixture = fresh_factory;
    fixture
        .factory
        .add_provider(edge_config("edge1"))
        .expect("first add should succeed");

    let err = fixture
        .factory
        .add_provider(edge_config("edge1"))
        .expect_err("second add should fail");
    assert!(matches!(err, FactoryError::DuplicateProvider { .. }));
}

#[rstest]
fn add_provider_rejects_blank_names(fresh_factory: FactoryFixture) {
    let mut fixture = fresh_factory;
    let err = fixture
        .factory
        .add_provider(edge_config("  "))
        .expect_err("blank name should fail");
    assert!(matches!(
        err,
        FactoryError::Config(ProviderConfigError::MissingName)
    ));
}

#[rstest]
fn removing_the_default_always_fails(fresh_factory: FactoryFixture) {
    let mut fixture = fresh_factory;
    let before = fixture.factory.list_providers();

    let err = fixture
        .factory
        .remove_provider("local")
        .expect_err("removing the default must fail");

    assert!(matches!(err, FactoryError::RemoveDefault { .. }));
    assert_eq!(fixture.factory.list_providers(), before);
}

#[rstest]
fn removing_an_unknown_provider_fails(fresh_factory: FactoryFixture) {
    let mut fixture = fresh_factory;
    let err = fixture
        .factory
        .remove_provider("ghost")
        .expect_err("unknown name should fail");
    assert!(matches!(err, FactoryError::UnknownProvider { .. }));
}

#[rstest]
#[tokio::test]
async fn promote_then_remove_cycle(fresh_factory: FactoryFixture) {
    let mut fixture = fresh_factory;
    fixture
        .factory
        .add_provider(edge_config("edge1"))
        .expect("add should succeed");
    fixture
        .factory
        .set_default_provider("edge1")
        .expect("promotion should succeed");

    let err = fixture
        .factory
        .remove_provider("edge1")
        .expect_err("removing the new default must fail");
    assert!(matches!(err, FactoryError::RemoveDefault { .. }));

    fixture
        .factory
        .set_default_provider("local")
        .expect("demotion should succeed");
    fixture
        .factory
        .remove_provider("edge1")
        .expect("removal should succeed once edge1 is no longer default");

    let names: Vec<String> = fixture
        .factory
        .list_providers()
        .into_iter()
        .map(|summary| summary.name)
        .collect();
    assert_eq!(names, vec![String::from("local")]);
}

#[rstest]
fn set_default_rejects_unknown_names(fresh_factory: FactoryFixture) {
    let mut fixture = fresh_factory;
    let err = fixture
        .factory
        .set_default_provider("ghost")
        .expect_err("unknown default should fail");
    assert!(matches!(err, FactoryError::UnknownProvider { .. }));
}

#[rstest]
fn settings_survive_a_reload(fresh_factory: FactoryFixture) {
    let mut fixture = fresh_factory;
    fixture
        .factory
        .add_provider(edge_config("edge1"))
        .expect("add should succeed");

    let reloaded = ProviderFactory::with_runner(
        fixture.settings_path.clone(),
        ProviderTooling::default(),
        ScriptedRunner::new(),
    )
    .expect("reload should succeed");

    let names: Vec<String> = reloaded
        .list_providers()
        .into_iter()
        .map(|summary| summary.name)
        .collect();
    assert_eq!(names, vec![String::from("edge1"), String::from("local")]);
    assert_eq!(reloaded.default_provider_name(), "local");
}

#[rstest]
#[tokio::test]
async fn health_batch_reports_every_provider(fresh_factory: FactoryFixture) {
    let mut fixture = fresh_factory;
    fixture
        .factory
        .add_provider(edge_config("edge1"))
        .expect("add should succeed");

    // Two successes at most: edge1 needs three transport calls (master
    // connect plus two probes), so it can never come out healthy, and the
    // batch must still report it alongside local.
    fixture.runner.push_success();
    fixture.runner.push_success();

    let reports = fixture.factory.check_all_providers_health().await;

    assert_eq!(reports.len(), 2);
    assert!(reports.contains_key("local"));
    let edge = reports.get("edge1").expect("edge report");
    assert!(!edge.healthy);
    assert!(edge.error.is_some());
}
