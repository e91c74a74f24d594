//! Deploy only ever sees an image that was pushed

use crate::helpers::*;

#[tokio::test]
async fn test_run_hosts_pull_after_push() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::default();

    let (_, result) = world
        .run(manifest(&dir.path().join("demo.pem"), &["demo-run"]))
        .await;
    result.unwrap();

    let build_host = world.cloud.address_of("demo-build");
    let run_host = world.cloud.address_of("demo-run");

    let push = world.hosts.position(&build_host, " push ").unwrap();
    let build_login = world.hosts.position(&build_host, "--password-stdin").unwrap();
    let remove = world.hosts.position(&run_host, "container inspect").unwrap();
    let run_login = world.hosts.position(&run_host, "--password-stdin").unwrap();
    let start = world.hosts.position(&run_host, " run -d ").unwrap();

    assert!(build_login < push);
    assert!(push < remove);
    assert!(remove < run_login);
    assert!(run_login < start);
}

#[tokio::test]
async fn test_deployed_image_is_the_pushed_image() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::default();

    let (_, result) = world
        .run(manifest(&dir.path().join("demo.pem"), &["demo-run"]))
        .await;
    result.unwrap();

    let log = world.hosts.log();
    let pushed = log
        .iter()
        .find(|r| r.command.contains(" push "))
        .map(|r| r.command.rsplit(' ').next().unwrap().to_string())
        .unwrap();
    let started = log
        .iter()
        .find(|r| r.command.contains(" run -d "))
        .map(|r| r.command.rsplit(' ').next().unwrap().to_string())
        .unwrap();
    assert_eq!(pushed, started);
}
