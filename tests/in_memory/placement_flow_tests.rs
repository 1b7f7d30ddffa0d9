//! Registration, liveness and placement working together.

use crate::in_memory::helpers::{Fleet, fleet, running};
use rstest::rstest;
use warren::fleet::{
    adapters::memory::AgentCommand,
    domain::{ContainerStatus, ContainerStatusReport, ReconcileOutcome, UserId},
    services::{ContainerLifecycleServiceError, DeletionOutcome, FleetRegistryServiceError, RequestContainer},
};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn containers_spread_across_equal_nodes(fleet: Fleet) {
    let (first_node, _) = fleet.online_node("edge-1", "10.1.0.5").await;
    let (second_node, _) = fleet.online_node("edge-2", "10.1.0.6").await;

    let first = fleet
        .lifecycle
        .request_container(RequestContainer::new(UserId::new(), "alice"))
        .await
        .expect("first placement");
    let second = fleet
        .lifecycle
        .request_container(RequestContainer::new(UserId::new(), "bob"))
        .await
        .expect("second placement");

    assert_ne!(first.node_id(), second.node_id());
    for container in [&first, &second] {
        assert!([first_node.id(), second_node.id()].contains(&container.node_id()));
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn silent_node_is_skipped_until_it_heartbeats_again(fleet: Fleet) {
    let (quiet, quiet_token) = fleet.online_node("edge-1", "10.1.0.5").await;
    let (chatty, chatty_token) = fleet.online_node("edge-2", "10.1.0.6").await;

    fleet.clock.advance_secs(60);
    fleet.heartbeat(&chatty_token, Vec::new()).await;
    fleet.clock.advance_secs(31);
    let flipped = fleet.registry.liveness_sweep().await.expect("sweep");
    assert_eq!(flipped, vec![quiet.id()]);

    let placed = fleet
        .lifecycle
        .request_container(RequestContainer::new(UserId::new(), "alice"))
        .await
        .expect("placement on the live node");
    assert_eq!(placed.node_id(), chatty.id());

    fleet.clock.advance_secs(120);
    fleet.registry.liveness_sweep().await.expect("sweep");
    let unavailable = fleet
        .lifecycle
        .request_container(RequestContainer::new(UserId::new(), "bob"))
        .await;
    assert!(matches!(
        unavailable,
        Err(ContainerLifecycleServiceError::Registry(
            FleetRegistryServiceError::PlacementUnavailable(_)
        ))
    ));

    fleet.heartbeat(&quiet_token, Vec::new()).await;
    let revived = fleet
        .lifecycle
        .request_container(RequestContainer::new(UserId::new(), "bob"))
        .await
        .expect("placement after revival");
    assert_eq!(revived.node_id(), quiet.id());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_provisioning_lets_the_owner_try_again(fleet: Fleet) {
    let (_, token) = fleet.online_node("edge-1", "10.1.0.5").await;
    let owner = UserId::new();
    let container = fleet
        .lifecycle
        .request_container(RequestContainer::new(owner, "alice"))
        .await
        .expect("placement");

    let outcome = fleet
        .report(
            &token,
            ContainerStatusReport::new(container.id(), ContainerStatus::Error)
                .with_message("image pull failed"),
        )
        .await;
    assert_eq!(outcome, ReconcileOutcome::RolledBack);

    let retried = fleet
        .lifecycle
        .request_container(RequestContainer::new(owner, "alice"))
        .await
        .expect("second attempt");
    assert_ne!(retried.id(), container.id());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_drives_container_to_running_and_stop_round_trips(fleet: Fleet) {
    let (node, token) = fleet.online_node("edge-1", "10.1.0.5").await;
    let container = fleet
        .lifecycle
        .request_container(RequestContainer::new(UserId::new(), "alice"))
        .await
        .expect("placement");

    fleet.clock.advance_secs(10);
    fleet.heartbeat(&token, vec![running(container.id())]).await;
    let stopping = fleet
        .lifecycle
        .stop_container(container.id())
        .await
        .expect("stop dispatched");
    assert_eq!(stopping.status(), ContainerStatus::Stopping);
    assert_eq!(
        fleet.report(&token, ContainerStatusReport::new(container.id(), ContainerStatus::Stopped)).await,
        ReconcileOutcome::Applied {
            status: ContainerStatus::Stopped
        }
    );

    let commands = fleet.agent.commands().expect("agent log");
    assert!(matches!(
        commands.as_slice(),
        [
            (create_node, AgentCommand::Create(_)),
            (stop_node, AgentCommand::Stop(stopped)),
        ] if *create_node == node.id() && *stop_node == node.id() && *stopped == container.id()
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deleting_a_node_strands_its_containers_until_purged(fleet: Fleet) {
    let (node, token) = fleet.online_node("edge-1", "10.1.0.5").await;
    let container = fleet
        .lifecycle
        .request_container(RequestContainer::new(UserId::new(), "alice"))
        .await
        .expect("placement");
    fleet.report(&token, running(container.id())).await;

    let orphaned = fleet.registry.delete_node(node.id()).await.expect("delete node");
    assert_eq!(orphaned, vec![container.id()]);
    let stranded = fleet
        .lifecycle
        .find_container(container.id())
        .await
        .expect("lookup")
        .expect("container kept");
    assert_eq!(stranded.status(), ContainerStatus::Error);
    assert_eq!(stranded.error_message(), Some("hosting node deleted"));

    let outcome = fleet
        .lifecycle
        .delete_container(container.id())
        .await
        .expect("delete container");
    assert!(matches!(outcome, DeletionOutcome::Purged));
    assert!(fleet
        .lifecycle
        .find_container(container.id())
        .await
        .expect("lookup")
        .is_none());
}
