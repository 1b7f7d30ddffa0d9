//! Shared fixtures for in-memory integration tests.

use std::sync::Arc;

use mockable::Clock;
use rstest::fixture;
use warren::clock::ManualClock;
use warren::fleet::{
    adapters::memory::{InMemoryFleetRepository, InMemoryNodeAgent},
    domain::{ContainerStatus, ContainerStatusReport, HeartbeatReport, Node, NodeToken, Resources},
    services::{ContainerLifecycleService, FleetRegistryService, ProvisionNodeRequest},
};

/// Registry type wired to in-memory adapters.
pub type Registry = FleetRegistryService<InMemoryFleetRepository, ManualClock>;

/// Lifecycle service type wired to in-memory adapters.
pub type Lifecycle = ContainerLifecycleService<InMemoryFleetRepository, InMemoryNodeAgent, ManualClock>;

/// Capacity reported by every test node.
pub const NODE_CAPACITY: Resources = Resources::new(8192, 8, 100);

/// A fleet control plane backed entirely by memory.
pub struct Fleet {
    pub repository: Arc<InMemoryFleetRepository>,
    pub clock: Arc<ManualClock>,
    pub agent: Arc<InMemoryNodeAgent>,
    pub registry: Registry,
    pub lifecycle: Lifecycle,
}

impl Fleet {
    /// Builds the services over `repository`.
    pub fn over(repository: InMemoryFleetRepository) -> Self {
        let repository = Arc::new(repository);
        let clock = Arc::new(ManualClock::default());
        let agent = Arc::new(InMemoryNodeAgent::new());
        let registry = FleetRegistryService::new(Arc::clone(&repository), Arc::clone(&clock));
        let lifecycle =
            ContainerLifecycleService::new(registry.clone(), Arc::clone(&agent), Arc::clone(&clock));
        Self {
            repository,
            clock,
            agent,
            registry,
            lifecycle,
        }
    }

    /// Provisions and registers a node at `address`.
    pub async fn online_node(&self, name: &str, address: &str) -> (Node, NodeToken) {
        let (_, token) = self
            .registry
            .provision_node(ProvisionNodeRequest::new(name, address))
            .await
            .expect("provision node");
        let node = self
            .registry
            .register_node(&token, NODE_CAPACITY)
            .await
            .expect("register node");
        (node, token)
    }

    /// Sends a heartbeat stamped with the current manual clock instant.
    ///
    /// Advance the clock between heartbeats so each one is newer.
    pub async fn heartbeat(&self, token: &NodeToken, containers: Vec<ContainerStatusReport>) {
        self.registry
            .heartbeat(
                token,
                HeartbeatReport {
                    reported_at: self.clock.utc(),
                    containers,
                },
            )
            .await
            .expect("heartbeat accepted");
    }

    /// Reports one container status from the node holding `token`.
    pub async fn report(
        &self,
        token: &NodeToken,
        report: ContainerStatusReport,
    ) -> warren::fleet::domain::ReconcileOutcome {
        self.registry
            .report_container_status(token, report)
            .await
            .expect("status report accepted")
    }
}

/// Provides a fleet with an empty, unpersisted registry.
#[fixture]
pub fn fleet() -> Fleet {
    Fleet::over(InMemoryFleetRepository::new())
}

/// Builds a running report for `container_id`.
pub fn running(container_id: warren::fleet::domain::ContainerId) -> ContainerStatusReport {
    ContainerStatusReport::new(container_id, ContainerStatus::Running).with_ip_address("172.17.0.2")
}
