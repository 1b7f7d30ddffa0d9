//! Registry writers racing over the same record.

use std::sync::Arc;

use async_trait::async_trait;
use mockable::Clock;
use tokio::sync::{Mutex, oneshot};
use warren::clock::ManualClock;
use warren::fleet::{
    adapters::memory::InMemoryFleetRepository,
    domain::{
        Container, ContainerId, HeartbeatReport, Node, NodeId, NodeToken, NodeTokenDigest, UserId,
    },
    ports::{FleetRepository, FleetRepositoryResult},
    services::{FleetRegistryService, ProvisionNodeRequest},
};

use crate::in_memory::helpers::NODE_CAPACITY;

/// Repository that pauses the next node listing after taking its snapshot,
/// so a test can slip another writer in before the lister acts on it.
struct PausingRepository {
    inner: InMemoryFleetRepository,
    gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl PausingRepository {
    fn new() -> Self {
        Self {
            inner: InMemoryFleetRepository::new(),
            gate: Mutex::new(None),
        }
    }

    /// Arms the pause. The first receiver fires once the snapshot is taken;
    /// the listing returns after the second sender fires.
    async fn pause_next_listing(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (listed_tx, listed_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        *self.gate.lock().await = Some((listed_tx, resume_rx));
        (listed_rx, resume_tx)
    }
}

#[async_trait]
impl FleetRepository for PausingRepository {
    async fn insert_node(&self, node: &Node) -> FleetRepositoryResult<()> {
        self.inner.insert_node(node).await
    }

    async fn update_node(&self, node: &Node) -> FleetRepositoryResult<Node> {
        self.inner.update_node(node).await
    }

    async fn delete_node(&self, node_id: NodeId) -> FleetRepositoryResult<()> {
        self.inner.delete_node(node_id).await
    }

    async fn find_node(&self, node_id: NodeId) -> FleetRepositoryResult<Option<Node>> {
        self.inner.find_node(node_id).await
    }

    async fn find_node_by_token(
        &self,
        digest: &NodeTokenDigest,
    ) -> FleetRepositoryResult<Option<Node>> {
        self.inner.find_node_by_token(digest).await
    }

    async fn list_nodes(&self) -> FleetRepositoryResult<Vec<Node>> {
        let snapshot = self.inner.list_nodes().await?;
        let armed = self.gate.lock().await.take();
        if let Some((listed, resume)) = armed {
            assert!(listed.send(()).is_ok(), "test stopped waiting for the listing");
            resume.await.expect("listing resumed");
        }
        Ok(snapshot)
    }

    async fn insert_container(&self, container: &Container) -> FleetRepositoryResult<()> {
        self.inner.insert_container(container).await
    }

    async fn update_container(&self, container: &Container) -> FleetRepositoryResult<Container> {
        self.inner.update_container(container).await
    }

    async fn delete_container(&self, container_id: ContainerId) -> FleetRepositoryResult<()> {
        self.inner.delete_container(container_id).await
    }

    async fn find_container(
        &self,
        container_id: ContainerId,
    ) -> FleetRepositoryResult<Option<Container>> {
        self.inner.find_container(container_id).await
    }

    async fn find_container_by_owner(
        &self,
        owner: UserId,
    ) -> FleetRepositoryResult<Option<Container>> {
        self.inner.find_container_by_owner(owner).await
    }

    async fn list_containers_on_node(
        &self,
        node_id: NodeId,
    ) -> FleetRepositoryResult<Vec<Container>> {
        self.inner.list_containers_on_node(node_id).await
    }

    async fn list_containers(&self) -> FleetRepositoryResult<Vec<Container>> {
        self.inner.list_containers().await
    }
}

async fn online_node(
    registry: &FleetRegistryService<PausingRepository, ManualClock>,
) -> (Node, NodeToken) {
    let (_, token) = registry
        .provision_node(ProvisionNodeRequest::new("edge-1", "10.1.0.5"))
        .await
        .expect("provision node");
    let node = registry
        .register_node(&token, NODE_CAPACITY)
        .await
        .expect("register node");
    (node, token)
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_landing_mid_sweep_keeps_the_node_online() {
    let repository = Arc::new(PausingRepository::new());
    let clock = Arc::new(ManualClock::default());
    let registry = FleetRegistryService::new(Arc::clone(&repository), Arc::clone(&clock));
    let (node, token) = online_node(&registry).await;
    clock.advance_secs(120);

    let (listed, resume) = repository.pause_next_listing().await;
    let sweeper = registry.clone();
    let sweep = tokio::spawn(async move { sweeper.liveness_sweep().await });
    listed.await.expect("sweep listed the nodes");
    registry
        .heartbeat(
            &token,
            HeartbeatReport {
                reported_at: clock.utc(),
                containers: Vec::new(),
            },
        )
        .await
        .expect("heartbeat accepted");
    assert!(resume.send(()).is_ok(), "sweep still running");

    let flipped = sweep.await.expect("sweep task").expect("sweep");

    assert!(flipped.is_empty());
    let stored = repository
        .find_node(node.id())
        .await
        .expect("lookup")
        .expect("node exists");
    assert!(stored.is_online());
}

#[tokio::test(flavor = "multi_thread")]
async fn update_from_an_outdated_copy_is_a_conflict() {
    let repository = Arc::new(PausingRepository::new());
    let clock = Arc::new(ManualClock::default());
    let registry = FleetRegistryService::new(Arc::clone(&repository), Arc::clone(&clock));
    let (node, _) = online_node(&registry).await;

    let fresh = repository.update_node(&node).await.expect("first update");
    let result = repository.update_node(&node).await;

    assert!(fresh.revision() > node.revision());
    assert!(matches!(
        result,
        Err(warren::fleet::ports::FleetRepositoryError::NodeConflict(id)) if id == node.id()
    ));
}
