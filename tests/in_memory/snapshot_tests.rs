//! Registry persistence across restarts.

use camino::Utf8PathBuf;
use crate::in_memory::helpers::{Fleet, running};
use tempfile::TempDir;
use warren::fleet::{
    adapters::memory::InMemoryFleetRepository,
    domain::{ContainerStatus, ContainerStatusReport, ReconcileOutcome, Resources, UserId},
    services::{FleetRegistryServiceError, RequestContainer},
};

fn snapshot_path(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("fleet.json")).expect("UTF-8 temp path")
}

fn reopen(path: &Utf8PathBuf) -> Fleet {
    Fleet::over(InMemoryFleetRepository::with_snapshot(path).expect("snapshot loads"))
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_snapshot_starts_empty() {
    let dir = TempDir::new().expect("temp dir");

    let fleet = reopen(&snapshot_path(&dir));

    assert!(fleet.registry.list_nodes().await.expect("list nodes").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn nodes_tokens_and_containers_survive_a_restart() {
    let dir = TempDir::new().expect("temp dir");
    let path = snapshot_path(&dir);
    let owner = UserId::new();

    let before = reopen(&path);
    let (node, token) = before.online_node("edge-1", "10.1.0.5:2222").await;
    let container = before
        .lifecycle
        .request_container(RequestContainer::new(owner, "alice"))
        .await
        .expect("placement");
    before.report(&token, running(container.id())).await;
    before.repository.save_snapshot().expect("snapshot saved");
    drop(before);

    let after = reopen(&path);
    let restored = after
        .registry
        .find_node(node.id())
        .await
        .expect("lookup")
        .expect("node restored");
    assert_eq!(restored.name(), node.name());
    assert_eq!(restored.capacity(), Resources::new(8192, 8, 100));
    assert_eq!(
        after
            .registry
            .allocated_on(node.id())
            .await
            .expect("allocation"),
        container.allocation()
    );

    let owned = after
        .lifecycle
        .find_container_by_owner(owner)
        .await
        .expect("lookup")
        .expect("container restored");
    assert_eq!(owned.status(), ContainerStatus::Running);
    assert_eq!(owned.ip_address(), Some("172.17.0.2"));

    let outcome = after
        .report(
            &token,
            ContainerStatusReport::new(container.id(), ContainerStatus::Stopped),
        )
        .await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            status: ContainerStatus::Stopped
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn node_names_stay_unique_after_a_restart() {
    let dir = TempDir::new().expect("temp dir");
    let path = snapshot_path(&dir);

    let before = reopen(&path);
    before.online_node("edge-1", "10.1.0.5").await;
    before.repository.save_snapshot().expect("snapshot saved");

    let after = reopen(&path);
    let duplicate = after
        .registry
        .provision_node(warren::fleet::services::ProvisionNodeRequest::new(
            "edge-1", "10.1.0.9",
        ))
        .await;

    assert!(matches!(
        duplicate,
        Err(FleetRegistryServiceError::Repository(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_snapshot_is_reported() {
    let dir = TempDir::new().expect("temp dir");
    let path = snapshot_path(&dir);
    std::fs::write(&path, "{ not json").expect("write corrupt snapshot");

    assert!(InMemoryFleetRepository::with_snapshot(&path).is_err());
}
