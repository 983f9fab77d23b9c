//! Behavioural tests driving the public API end to end with scripted
//! command outcomes.

use camino::Utf8PathBuf;
use tempfile::TempDir;

use topolab::test_support::ScriptedRunner;
use topolab::{
    KnownHostsPolicy, LabOrchestrator, LabRegistry, LabStatus, ProviderConfig, ProviderFactory,
    ProviderTooling, SshProviderConfig, StatusOutcome, TopologyResolver,
};

const RING: &str = "name: ring\ntopology:\n  nodes:\n    a:\n      kind: linux\n    b:\n      kind: linux\n    c:\n      kind: linux\n";

struct World {
    orchestrator: LabOrchestrator<ScriptedRunner>,
    runner: ScriptedRunner,
    root: Utf8PathBuf,
    _dir: TempDir,
}

fn world() -> World {
    let dir = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp path");
    let runner = ScriptedRunner::new();
    let factory = ProviderFactory::with_runner(
        root.join("providers.json"),
        ProviderTooling::default(),
        runner.clone(),
    )
    .expect("factory should bootstrap");
    let orchestrator = LabOrchestrator::new(
        factory,
        LabRegistry::new(root.join("labs.json")),
        TopologyResolver::new(root.join("downloads")),
        String::from("containerlab"),
        Utf8PathBuf::from("/tmp"),
    );
    World {
        orchestrator,
        runner,
        root,
        _dir: dir,
    }
}

fn write_ring_topology(world: &World) -> Utf8PathBuf {
    let path = world.root.join("ring.clab.yml");
    std::fs::write(&path, RING).expect("write topology");
    path
}

#[tokio::test]
async fn full_lifecycle_round_trip() {
    let world = world();
    let path = write_ring_topology(&world);

    world.runner.push_success(); // capability probe
    world.runner.push_success(); // deploy
    let launched = world
        .orchestrator
        .launch(path.as_str(), None)
        .await
        .expect("launch should succeed");
    assert_eq!(launched.name, "ring");
    assert_eq!(launched.node_count, 3);

    world.runner.push_success(); // inspect
    let labs = world
        .orchestrator
        .list_active()
        .await
        .expect("listing should succeed");
    assert_eq!(labs.len(), 1);
    let row = labs.first().expect("one row");
    assert_eq!(row.status, LabStatus::Running);
    assert_eq!(row.node_count, 3);

    world.runner.push_success(); // destroy
    let stopped = world
        .orchestrator
        .stop(&launched.lab_id, None)
        .await
        .expect("stop should succeed");
    assert!(stopped.destroy_warning.is_none());

    let status = world.orchestrator.status(&launched.lab_id).await;
    assert!(matches!(status, StatusOutcome::NotFound { .. }));
}

#[tokio::test]
async fn registry_survives_an_orchestrator_restart() {
    let world = world();
    let path = write_ring_topology(&world);

    world.runner.push_success();
    world.runner.push_success();
    let launched = world
        .orchestrator
        .launch(path.as_str(), None)
        .await
        .expect("launch should succeed");

    // A fresh orchestrator over the same state directory still knows the
    // lab: the registry document is the durable source of truth.
    let runner = ScriptedRunner::new();
    let factory = ProviderFactory::with_runner(
        world.root.join("providers.json"),
        ProviderTooling::default(),
        runner.clone(),
    )
    .expect("factory should reload");
    let restarted = LabOrchestrator::new(
        factory,
        LabRegistry::new(world.root.join("labs.json")),
        TopologyResolver::new(world.root.join("downloads")),
        String::from("containerlab"),
        Utf8PathBuf::from("/tmp"),
    );

    runner.push_exit_code(1); // inspect: tool no longer reports the lab
    let status = restarted.status(&launched.lab_id).await;
    let StatusOutcome::Found(summary) = status else {
        panic!("expected the lab to be found, got {status:?}");
    };
    assert_eq!(summary.name, "ring");
    assert_eq!(summary.status, LabStatus::Stopped);
}

#[tokio::test]
async fn provider_add_promote_remove_cycle() {
    let mut world = world();

    let edge = ProviderConfig::Ssh(SshProviderConfig {
        name: String::from("edge1"),
        enabled: true,
        host: String::from("10.0.0.5"),
        port: 22,
        username: String::from("ops"),
        password: Some(String::from("x")),
        private_key_path: None,
        known_hosts: KnownHostsPolicy::Accept,
    });

    let factory = world.orchestrator.factory_mut();
    factory.add_provider(edge).expect("add should succeed");
    factory
        .set_default_provider("edge1")
        .expect("promotion should succeed");
    factory
        .remove_provider("edge1")
        .expect_err("the default must not be removable");
    factory
        .set_default_provider("local")
        .expect("demotion should succeed");
    factory
        .remove_provider("edge1")
        .expect("removal should succeed after demotion");

    let names: Vec<String> = factory
        .list_providers()
        .into_iter()
        .map(|summary| summary.name)
        .collect();
    assert_eq!(names, vec![String::from("local")]);
}
