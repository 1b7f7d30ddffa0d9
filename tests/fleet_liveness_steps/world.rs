//! Shared world state for node liveness BDD scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use rstest::fixture;
use warren::clock::ManualClock;
use warren::fleet::{
    adapters::memory::{InMemoryFleetRepository, InMemoryNodeAgent},
    domain::{Container, NodeId, NodeToken, UserId},
    services::{ContainerLifecycleService, ContainerLifecycleServiceError, FleetRegistryService},
};

/// Registry type used by the BDD world.
pub type TestRegistry = FleetRegistryService<InMemoryFleetRepository, ManualClock>;

/// Lifecycle service type used by the BDD world.
pub type TestLifecycle =
    ContainerLifecycleService<InMemoryFleetRepository, InMemoryNodeAgent, ManualClock>;

/// Scenario world for liveness behaviour tests.
pub struct LivenessWorld {
    /// Clock shared by both services.
    pub clock: Arc<ManualClock>,
    /// The registry under test.
    pub registry: TestRegistry,
    /// Lifecycle service placing through the registry.
    pub lifecycle: TestLifecycle,
    /// Provisioned nodes by name.
    pub nodes: HashMap<String, (NodeId, NodeToken)>,
    /// Users by login name.
    pub users: HashMap<String, UserId>,
    /// Result of the last container request.
    pub last_request: Option<Result<Container, ContainerLifecycleServiceError>>,
    /// Nodes flipped by the last sweep.
    pub last_sweep: Option<Vec<NodeId>>,
}

impl LivenessWorld {
    /// Creates a world with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let repository = Arc::new(InMemoryFleetRepository::new());
        let clock = Arc::new(ManualClock::default());
        let registry = FleetRegistryService::new(repository, Arc::clone(&clock));
        let lifecycle = ContainerLifecycleService::new(
            registry.clone(),
            Arc::new(InMemoryNodeAgent::new()),
            Arc::clone(&clock),
        );
        Self {
            clock,
            registry,
            lifecycle,
            nodes: HashMap::new(),
            users: HashMap::new(),
            last_request: None,
            last_sweep: None,
        }
    }

    /// Looks up a node provisioned earlier in the scenario.
    ///
    /// # Errors
    ///
    /// Returns an error when no node of that name was provisioned.
    pub fn node(&self, name: &str) -> Result<(NodeId, NodeToken), eyre::Report> {
        self.nodes
            .get(name)
            .cloned()
            .ok_or_else(|| eyre::eyre!("node '{name}' was not provisioned in this scenario"))
    }

    /// Returns the user id for `username`, creating one on first use.
    pub fn user(&mut self, username: &str) -> UserId {
        *self.users.entry(username.to_owned()).or_insert_with(UserId::new)
    }
}

impl Default for LivenessWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> LivenessWorld {
    LivenessWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
