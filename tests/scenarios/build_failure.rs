//! A build that never produces its artifact

use crate::helpers::*;
use shipline::core::{ContextKey, DeployError, ExecutionStatus, Stage};

#[tokio::test]
async fn test_missing_artifact_stops_before_publish() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::default();
    *world.hosts.artifact_missing.lock().unwrap() = true;

    let (deployment, result) = world
        .run(manifest(&dir.path().join("demo.pem"), &["demo-run"]))
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.stage, Stage::Build);
    match &err.source {
        DeployError::Build(message) => assert!(message.contains("verify-artifact")),
        other => panic!("expected a build error, got {:?}", other),
    }
    assert!(err.to_string().contains("Build"));

    assert_eq!(deployment.state.status, ExecutionStatus::Failed(Stage::Build));
    assert_stage_skipped(&deployment, Stage::Publish);
    assert_stage_skipped(&deployment, Stage::Deploy);
    assert!(!deployment.context.contains(ContextKey::ArtifactPath));
    assert!(!deployment.context.contains(ContextKey::PublishedImage));

    let log = world.hosts.log();
    assert!(!log.iter().any(|r| r.command.contains(" push ")));
    assert!(!log.iter().any(|r| r.command.contains("--password-stdin")));
    assert!(!log.iter().any(|r| r.command.contains(" run -d ")));
}

#[tokio::test]
async fn test_image_not_built_after_failed_verify() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::default();
    *world.hosts.artifact_missing.lock().unwrap() = true;

    let (_, result) = world
        .run(manifest(&dir.path().join("demo.pem"), &["demo-run"]))
        .await;

    assert!(result.is_err());
    let build_host = world.cloud.address_of("demo-build");
    assert!(world.hosts.position(&build_host, "test -f").is_some());
    assert!(world.hosts.position(&build_host, " build -t ").is_none());
}
