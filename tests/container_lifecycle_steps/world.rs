//! Shared world state for container lifecycle BDD scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use mockable::DefaultClock;
use rstest::fixture;
use warren::fleet::{
    adapters::memory::{InMemoryFleetRepository, InMemoryNodeAgent},
    domain::{
        Container, ContainerId, ContainerStatus, ContainerStatusReport, NodeToken,
        ReconcileOutcome, UserId,
    },
    services::{ContainerLifecycleService, ContainerLifecycleServiceError, FleetRegistryService},
};

/// Registry type used by the BDD world.
pub type TestRegistry = FleetRegistryService<InMemoryFleetRepository, DefaultClock>;

/// Lifecycle service type used by the BDD world.
pub type TestLifecycle =
    ContainerLifecycleService<InMemoryFleetRepository, InMemoryNodeAgent, DefaultClock>;

/// Scenario world for container lifecycle behaviour tests.
pub struct LifecycleWorld {
    /// The registry receiving node reports.
    pub registry: TestRegistry,
    /// The lifecycle service under test.
    pub lifecycle: TestLifecycle,
    /// Token of the scenario's node.
    pub node_token: Option<NodeToken>,
    /// Users by login name.
    pub users: HashMap<String, UserId>,
    /// Containers by owner login name.
    pub containers: HashMap<String, ContainerId>,
    /// Outcome of the last status report.
    pub last_report: Option<ReconcileOutcome>,
    /// Result of the last admin command.
    pub last_command: Option<Result<Container, ContainerLifecycleServiceError>>,
}

impl LifecycleWorld {
    /// Creates a world with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let registry = FleetRegistryService::new(
            Arc::new(InMemoryFleetRepository::new()),
            Arc::new(DefaultClock),
        );
        let lifecycle = ContainerLifecycleService::new(
            registry.clone(),
            Arc::new(InMemoryNodeAgent::new()),
            Arc::new(DefaultClock),
        );
        Self {
            registry,
            lifecycle,
            node_token: None,
            users: HashMap::new(),
            containers: HashMap::new(),
            last_report: None,
            last_command: None,
        }
    }

    /// Returns the user id for `username`, creating one on first use.
    pub fn user(&mut self, username: &str) -> UserId {
        *self.users.entry(username.to_owned()).or_insert_with(UserId::new)
    }

    /// Looks up the container requested for `username`.
    ///
    /// # Errors
    ///
    /// Returns an error when no container was requested for the user.
    pub fn container(&self, username: &str) -> Result<ContainerId, eyre::Report> {
        self.containers
            .get(username)
            .copied()
            .ok_or_else(|| eyre::eyre!("no container was requested for '{username}'"))
    }

    /// Sends a status report for `username`'s container from the node.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown status, a missing node or container,
    /// or a rejected report.
    pub fn report(&self, username: &str, status: &str) -> Result<ReconcileOutcome, eyre::Report> {
        let parsed = ContainerStatus::try_from(status)
            .map_err(|err| eyre::eyre!("invalid status in scenario: {err}"))?;
        let token = self
            .node_token
            .as_ref()
            .ok_or_else(|| eyre::eyre!("no node in scenario world"))?;
        let report = ContainerStatusReport::new(self.container(username)?, parsed);
        run_async(self.registry.report_container_status(token, report))
            .map_err(|err| eyre::eyre!("status report failed: {err}"))
    }
}

impl Default for LifecycleWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> LifecycleWorld {
    LifecycleWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
