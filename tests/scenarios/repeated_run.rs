//! Running again against resources an earlier run created

use crate::helpers::*;
use shipline::core::{DeployError, Stage};

#[tokio::test]
async fn test_second_run_creates_nothing_and_redeploys() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("demo.pem");
    let world = World::default();

    let (_, first) = world.run(manifest(&key_path, &["demo-run"])).await;
    first.unwrap();
    let created_after_first = world.cloud.created();
    let key_after_first = std::fs::read_to_string(&key_path).unwrap();

    let (deployment, second) = world.run(manifest(&key_path, &["demo-run"])).await;

    second.unwrap();
    assert_stage_passed(&deployment, Stage::Deploy);
    assert_eq!(world.cloud.created(), created_after_first);
    assert!(deployment.resources.iter().all(|r| !r.created));
    assert!(deployment.resources.iter().all(|r| r.private_key.is_none()));
    assert_eq!(std::fs::read_to_string(&key_path).unwrap(), key_after_first);
}

#[tokio::test]
async fn test_at_most_one_service_container() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("demo.pem");
    let world = World::default();

    for _ in 0..2 {
        let (_, result) = world.run(manifest(&key_path, &["demo-run"])).await;
        result.unwrap();
    }

    let run_host = world.cloud.address_of("demo-run");
    let containers = world.hosts.containers(&run_host);
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].0, "demo");
}

#[tokio::test]
async fn test_text_edit_written_once_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("demo.pem");
    let world = World::default();

    for _ in 0..2 {
        let (_, result) = world.run(manifest(&key_path, &["demo-run"])).await;
        result.unwrap();
    }

    let build_host = world.cloud.address_of("demo-build");
    let writes: Vec<_> = world
        .hosts
        .log()
        .into_iter()
        .filter(|r| r.host == build_host && r.command.contains("tee "))
        .collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].stdin.as_deref(), Some("server.port=8080\n"));
}

#[tokio::test]
async fn test_existing_key_pair_without_local_key_fails_provision() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::with_cloud(FakeCloud::default().with_key_pair("demo-key"));

    let (deployment, result) = world
        .run(manifest(&dir.path().join("missing.pem"), &["demo-run"]))
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.stage, Stage::Provision);
    assert!(matches!(err.source, DeployError::Provisioning { .. }));
    assert!(world.cloud.created().is_empty());
    assert!(world.hosts.log().is_empty());
    assert_stage_skipped(&deployment, Stage::Prepare);
}

#[tokio::test]
async fn test_stale_containers_replaced_by_one() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::default();
    // The run host is the second instance created
    world.hosts.seed_containers(
        "10.0.0.2",
        &[("demo", "old/demo:1"), ("demo", "old/demo:2"), ("sidecar", "other:latest")],
    );

    let (_, result) = world
        .run(manifest(&dir.path().join("demo.pem"), &["demo-run"]))
        .await;
    result.unwrap();

    let containers = world.hosts.containers("10.0.0.2");
    let named: Vec<_> = containers.iter().filter(|(n, _)| n == "demo").collect();
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].1, format!("{}:latest", REGISTRY_URI));
    assert!(containers.iter().any(|(n, _)| n == "sidecar"));
}
