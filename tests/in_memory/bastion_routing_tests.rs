//! Fleet state as the SSH gateway sees it.

use std::sync::Arc;
use std::time::Duration;

use crate::in_memory::helpers::{Fleet, fleet, running};
use rstest::rstest;
use warren::bastion::{
    adapters::memory::{InMemoryBackendConnector, InMemoryUserDirectory},
    domain::{AuthorizedKey, BastionError, DirectoryUser, OfferedCredential},
    ports::BackendTarget,
    services::{Authenticator, SessionBroker, SessionPlan},
};
use warren::fleet::{
    adapters::memory::InMemoryFleetRepository,
    domain::{ContainerId, UserId},
    services::RequestContainer,
};

const ALICE_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAICvYBsl/DgCvGh/DMo+nY6kmlyPI24+sT5OvcdsYbW6Q alice@laptop";

struct Gateway {
    authenticator: Authenticator<InMemoryUserDirectory, InMemoryFleetRepository>,
    broker: SessionBroker<InMemoryBackendConnector>,
    connector: Arc<InMemoryBackendConnector>,
}

impl Gateway {
    fn over(fleet: &Fleet, owner: UserId) -> Self {
        let directory = Arc::new(InMemoryUserDirectory::new());
        let key = AuthorizedKey::parse(ALICE_KEY).expect("valid key");
        directory
            .upsert(DirectoryUser::new(owner, "alice").with_public_key(key))
            .expect("store user");
        let connector = Arc::new(InMemoryBackendConnector::new());
        Self {
            authenticator: Authenticator::new(directory, Arc::clone(&fleet.repository)),
            broker: SessionBroker::new(Arc::clone(&connector), Duration::from_millis(200), 22),
            connector,
        }
    }

    async fn connect_as_alice(&self) -> Result<SessionPlan, BastionError> {
        let wire = AuthorizedKey::parse(ALICE_KEY)
            .expect("valid key")
            .wire_bytes()
            .to_vec();
        let context = self
            .authenticator
            .authenticate("alice", OfferedCredential::PublicKey(wire))
            .await
            .expect("alice authenticates");
        self.broker.open(&context).await
    }
}

async fn place_for(fleet: &Fleet, owner: UserId) -> ContainerId {
    fleet
        .lifecycle
        .request_container(RequestContainer::new(owner, "alice"))
        .await
        .expect("placement")
        .id()
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn user_is_relayed_to_the_node_hosting_their_container(fleet: Fleet) {
    let owner = UserId::new();
    let (_, token) = fleet.online_node("edge-1", "10.1.0.5:2222").await;
    let container_id = place_for(&fleet, owner).await;
    fleet.report(&token, running(container_id)).await;
    let gateway = Gateway::over(&fleet, owner);

    let plan = gateway.connect_as_alice().await.expect("session opens");

    assert!(matches!(plan, SessionPlan::Relay(_)));
    assert_eq!(
        gateway.connector.dials(),
        vec![BackendTarget {
            host: "10.1.0.5".to_owned(),
            port: 2222,
            username: "alice".to_owned(),
        }]
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn user_without_container_sees_banner_even_with_nodes_online(fleet: Fleet) {
    fleet.online_node("edge-1", "10.1.0.5").await;
    let gateway = Gateway::over(&fleet, UserId::new());

    let plan = gateway.connect_as_alice().await.expect("session opens");

    let SessionPlan::Banner(text) = plan else {
        panic!("expected a banner");
    };
    assert!(text.contains("alice"));
    assert!(gateway.connector.dials().is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn offline_node_is_still_dialled(fleet: Fleet) {
    let owner = UserId::new();
    fleet.online_node("edge-1", "10.1.0.5").await;
    place_for(&fleet, owner).await;
    fleet.clock.advance_secs(91);
    fleet.registry.liveness_sweep().await.expect("sweep");
    let gateway = Gateway::over(&fleet, owner);

    let plan = gateway.connect_as_alice().await.expect("session opens");

    assert!(matches!(plan, SessionPlan::Relay(_)));
    assert_eq!(gateway.connector.dials().len(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn container_on_deleted_node_is_unreachable_without_dial(fleet: Fleet) {
    let owner = UserId::new();
    let (node, _) = fleet.online_node("edge-1", "10.1.0.5").await;
    let container_id = place_for(&fleet, owner).await;
    fleet.registry.delete_node(node.id()).await.expect("delete node");
    let gateway = Gateway::over(&fleet, owner);

    let outcome = gateway.connect_as_alice().await;

    assert!(matches!(
        outcome,
        Err(BastionError::NodeUnreachable { container_id: unreachable, .. })
            if unreachable == container_id
    ));
    assert!(gateway.connector.dials().is_empty());
}
