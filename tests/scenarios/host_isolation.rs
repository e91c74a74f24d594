//! Prepare failures on one host leave its siblings alone

use crate::helpers::*;
use shipline::core::{ContextKey, Stage};

#[tokio::test]
async fn test_failed_host_excluded_siblings_deploy() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::default();
    // Instances get addresses in manifest order; demo-run-a is the second
    world
        .hosts
        .broken_installs
        .lock()
        .unwrap()
        .insert("10.0.0.2".to_string());

    let (deployment, result) = world
        .run(manifest(&dir.path().join("demo.pem"), &["demo-run-a", "demo-run-b"]))
        .await;

    result.unwrap();
    assert_eq!(world.cloud.address_of("demo-run-a"), "10.0.0.2");
    let healthy = world.cloud.address_of("demo-run-b");

    assert_eq!(deployment.state.host_failures.len(), 1);
    assert_eq!(deployment.state.host_failures[0].host, "10.0.0.2");
    assert_eq!(deployment.state.host_failures[0].stage, Stage::Prepare);

    let prepared = deployment.context.get(ContextKey::PreparedHosts).unwrap();
    assert!(!prepared.contains("10.0.0.2"));
    assert!(prepared.contains(&healthy));

    assert!(world.hosts.position("10.0.0.2", "systemctl").is_none());
    assert!(world.hosts.position("10.0.0.2", " run -d ").is_none());
    assert_eq!(world.hosts.containers(&healthy).len(), 1);
    assert_eq!(
        deployment.service_url(),
        Some(format!("http://{}:80/hello", healthy).as_str())
    );
}

#[tokio::test]
async fn test_prepare_fails_when_every_host_fails() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::default();
    world
        .hosts
        .broken_installs
        .lock()
        .unwrap()
        .extend(["10.0.0.1".to_string(), "10.0.0.2".to_string()]);

    let (deployment, result) = world
        .run(manifest(&dir.path().join("demo.pem"), &["demo-run"]))
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.stage, Stage::Prepare);
    assert_eq!(deployment.state.host_failures.len(), 2);
    assert_stage_skipped(&deployment, Stage::Build);
    assert!(!world
        .hosts
        .log()
        .iter()
        .any(|r| r.command.contains("--entrypoint sh")));
}

#[tokio::test]
async fn test_failed_build_host_fails_build_stage() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::default();
    world
        .hosts
        .broken_installs
        .lock()
        .unwrap()
        .insert("10.0.0.1".to_string());

    let (deployment, result) = world
        .run(manifest(&dir.path().join("demo.pem"), &["demo-run"]))
        .await;

    let err = result.unwrap_err();
    assert_stage_passed(&deployment, Stage::Prepare);
    assert_eq!(err.stage, Stage::Build);
    assert!(err.to_string().contains("no build host"));
}
