//! Shared world state for bastion routing BDD scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use warren::bastion::{
    adapters::memory::{InMemoryBackendConnector, InMemoryUserDirectory},
    domain::{BastionError, OfferedCredential},
    services::{Authenticator, SessionBroker, SessionPlan},
};
use warren::clock::ManualClock;
use warren::fleet::{
    adapters::memory::InMemoryFleetRepository,
    domain::{NodeId, UserId},
};

/// Key stored for directory users created with a public key.
pub const STORED_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAICvYBsl/DgCvGh/DMo+nY6kmlyPI24+sT5OvcdsYbW6Q alice@laptop";

/// Key that matches no directory user.
pub const OTHER_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIMCkl3YbF1N57WM5fMmAVGVZ+qhMqcvu3ncxF8MVCLas";

/// Scenario world for bastion routing behaviour tests.
pub struct BastionWorld {
    /// Directory the authenticator reads.
    pub directory: Arc<InMemoryUserDirectory>,
    /// Fleet store the authenticator resolves containers in.
    pub fleet: Arc<InMemoryFleetRepository>,
    /// Clock stamping fleet records.
    pub clock: ManualClock,
    /// Authenticator under test.
    pub authenticator: Authenticator<InMemoryUserDirectory, InMemoryFleetRepository>,
    /// Broker under test.
    pub broker: SessionBroker<InMemoryBackendConnector>,
    /// Connector recording backend dials.
    pub connector: Arc<InMemoryBackendConnector>,
    /// Directory users by login name.
    pub users: HashMap<String, UserId>,
    /// Node hosting the scenario's container.
    pub hosting_node: Option<NodeId>,
    /// Result of the last connection attempt.
    pub outcome: Option<Result<SessionPlan, BastionError>>,
}

impl BastionWorld {
    /// Creates a world with an empty directory and fleet.
    #[must_use]
    pub fn new() -> Self {
        let directory = Arc::new(InMemoryUserDirectory::new());
        let fleet = Arc::new(InMemoryFleetRepository::new());
        let connector = Arc::new(InMemoryBackendConnector::new());
        Self {
            authenticator: Authenticator::new(Arc::clone(&directory), Arc::clone(&fleet)),
            broker: SessionBroker::new(Arc::clone(&connector), Duration::from_millis(200), 22),
            directory,
            fleet,
            clock: ManualClock::default(),
            connector,
            users: HashMap::new(),
            hosting_node: None,
            outcome: None,
        }
    }

    /// Authenticates `username` and opens the routed session.
    pub fn connect(&mut self, username: &str, offered: OfferedCredential) {
        let authenticator = &self.authenticator;
        let broker = &self.broker;
        let outcome = run_async(async move {
            let context = authenticator.authenticate(username, offered).await?;
            broker.open(&context).await
        });
        self.outcome = Some(outcome);
    }

    /// Returns the last connection outcome.
    ///
    /// # Errors
    ///
    /// Returns an error when no connection was attempted.
    pub fn outcome(&self) -> Result<&Result<SessionPlan, BastionError>, eyre::Report> {
        self.outcome
            .as_ref()
            .ok_or_else(|| eyre::eyre!("no connection was attempted"))
    }
}

impl Default for BastionWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> BastionWorld {
    BastionWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
