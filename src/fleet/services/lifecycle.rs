//! Container lifecycle orchestration: placement, runtime commands, deletion.

use crate::fleet::{
    domain::{
        Container, ContainerId, ContainerStatus, FleetDomainError, Node, NodeId, PortMapping,
        PortProtocol, Resources, UserId,
    },
    ports::{
        FleetRepository, FleetRepositoryError, NodeAgent, NodeAgentError, ProvisionSpec,
        SshCredential,
    },
};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::registry::{FleetRegistryService, FleetRegistryServiceError};
use super::retry::{Change, modify_container};

/// A runtime command the agent is asked to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
}

impl Command {
    const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    const fn requested_status(self) -> ContainerStatus {
        match self {
            Self::Start => ContainerStatus::Starting,
            Self::Stop => ContainerStatus::Stopping,
        }
    }

    fn apply(self, container: &mut Container, clock: &impl Clock) -> Result<(), FleetDomainError> {
        match self {
            Self::Start => container.begin_start(clock),
            Self::Stop => container.begin_stop(clock),
        }
    }
}

/// Request payload for provisioning a user's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContainer {
    /// Owning user.
    pub owner: UserId,
    /// Owning user's login name.
    pub username: String,
    /// Resource slice; the default allocation when absent.
    pub allocation: Option<Resources>,
}

impl RequestContainer {
    /// Creates a request with the default allocation.
    #[must_use]
    pub fn new(owner: UserId, username: impl Into<String>) -> Self {
        Self {
            owner,
            username: username.into(),
            allocation: None,
        }
    }

    /// Sets an explicit allocation.
    #[must_use]
    pub const fn with_allocation(mut self, allocation: Resources) -> Self {
        self.allocation = Some(allocation);
        self
    }
}

/// What a deletion request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// The agent was told to destroy the container; confirmation is pending.
    Pending(Container),
    /// The hosting node no longer exists, so the row was purged at once.
    Purged,
}

/// Service-level errors for container lifecycle operations.
#[derive(Debug, Error)]
pub enum ContainerLifecycleServiceError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] FleetDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] FleetRepositoryError),
    /// Registry operation failed, including placement.
    #[error(transparent)]
    Registry(#[from] FleetRegistryServiceError),
    /// The node agent failed or refused the command.
    #[error(transparent)]
    Agent(#[from] NodeAgentError),
    /// The user already has a container.
    #[error("user {0} already has a container")]
    ContainerAlreadyAssigned(UserId),
    /// No container exists with the given identifier.
    #[error("container {0} not found")]
    NotFound(ContainerId),
    /// The container's hosting node no longer exists.
    #[error("hosting node {0} not found")]
    NodeNotFound(NodeId),
    /// The container is being deleted and accepts no further commands.
    #[error("container {container_id} is {status}")]
    ContainerUnavailable {
        /// Container identifier.
        container_id: ContainerId,
        /// Current status.
        status: ContainerStatus,
    },
}

/// Result type for container lifecycle service operations.
pub type ContainerLifecycleServiceResult<T> = Result<T, ContainerLifecycleServiceError>;

/// Container lifecycle orchestration service.
pub struct ContainerLifecycleService<R, A, C>
where
    R: FleetRepository,
    A: NodeAgent,
    C: Clock + Send + Sync,
{
    registry: FleetRegistryService<R, C>,
    repository: Arc<R>,
    agent: Arc<A>,
    clock: Arc<C>,
}

impl<R, A, C> Clone for ContainerLifecycleService<R, A, C>
where
    R: FleetRepository,
    A: NodeAgent,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: Arc::clone(&self.repository),
            agent: Arc::clone(&self.agent),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<R, A, C> ContainerLifecycleService<R, A, C>
where
    R: FleetRepository,
    A: NodeAgent,
    C: Clock + Send + Sync,
{
    /// Creates a lifecycle service placing through `registry`.
    #[must_use]
    pub fn new(registry: FleetRegistryService<R, C>, agent: Arc<A>, clock: Arc<C>) -> Self {
        let repository = registry.repository();
        Self {
            registry,
            repository,
            agent,
            clock,
        }
    }

    async fn find_container_or_error(
        &self,
        container_id: ContainerId,
    ) -> ContainerLifecycleServiceResult<Container> {
        self.repository
            .find_container(container_id)
            .await?
            .ok_or(ContainerLifecycleServiceError::NotFound(container_id))
    }

    async fn hosting_node(&self, container: &Container) -> ContainerLifecycleServiceResult<Node> {
        self.repository
            .find_node(container.node_id())
            .await?
            .ok_or(ContainerLifecycleServiceError::NodeNotFound(
                container.node_id(),
            ))
    }

    async fn find_commandable(
        &self,
        container_id: ContainerId,
    ) -> ContainerLifecycleServiceResult<(Container, Node)> {
        let container = self.find_container_or_error(container_id).await?;
        if matches!(
            container.status(),
            ContainerStatus::Deleting | ContainerStatus::Deleted
        ) {
            return Err(ContainerLifecycleServiceError::ContainerUnavailable {
                container_id,
                status: container.status(),
            });
        }
        let node = self.hosting_node(&container).await?;
        Ok((container, node))
    }

    /// Places a container for a user without one and asks the chosen node's
    /// agent to provision it.
    ///
    /// The container is persisted as `creating` before dispatch. When the
    /// dispatch fails the row is purged again so the user stays unassigned.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerLifecycleServiceError::ContainerAlreadyAssigned`]
    /// when the user already has a container, registry errors such as
    /// placement unavailability, and agent errors.
    pub async fn request_container(
        &self,
        request: RequestContainer,
    ) -> ContainerLifecycleServiceResult<Container> {
        if self
            .repository
            .find_container_by_owner(request.owner)
            .await?
            .is_some()
        {
            return Err(ContainerLifecycleServiceError::ContainerAlreadyAssigned(
                request.owner,
            ));
        }

        let allocation = request
            .allocation
            .unwrap_or(Resources::DEFAULT)
            .validated()?;
        let node = self.registry.select_node_for_placement(allocation).await?;
        let container = Container::place(
            request.owner,
            &request.username,
            node.id(),
            allocation,
            &*self.clock,
        );

        match self.repository.insert_container(&container).await {
            Err(FleetRepositoryError::OwnerAlreadyAssigned(owner)) => {
                return Err(ContainerLifecycleServiceError::ContainerAlreadyAssigned(owner));
            }
            other => other?,
        }

        let spec = ProvisionSpec {
            container_id: container.id(),
            user_id: request.owner,
            username: request.username,
            name: container.name().to_owned(),
            allocation,
        };
        if let Err(err) = self.agent.create_container(&node, &spec).await {
            warn!(
                container_id = %container.id(),
                node_id = %node.id(),
                %err,
                "provisioning dispatch failed, releasing container assignment"
            );
            self.repository.delete_container(container.id()).await?;
            return Err(err.into());
        }

        info!(
            container_id = %container.id(),
            node_id = %node.id(),
            owner = %container.owner(),
            "container placed"
        );
        Ok(container)
    }

    /// Records a start request and sends it to the hosting agent.
    ///
    /// `starting` is stored before dispatch so that the agent's confirmation
    /// always lands on top of it. When the dispatch fails the container goes
    /// back to its earlier status, unless a report moved it meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerLifecycleServiceError::NotFound`], domain errors
    /// for an invalid transition, and agent or repository errors.
    pub async fn start_container(
        &self,
        container_id: ContainerId,
    ) -> ContainerLifecycleServiceResult<Container> {
        self.command(container_id, Command::Start).await
    }

    /// Records a stop request and sends it to the hosting agent.
    ///
    /// Storage and rollback follow [`Self::start_container`].
    ///
    /// # Errors
    ///
    /// Returns [`ContainerLifecycleServiceError::NotFound`], domain errors
    /// for an invalid transition, and agent or repository errors.
    pub async fn stop_container(
        &self,
        container_id: ContainerId,
    ) -> ContainerLifecycleServiceResult<Container> {
        self.command(container_id, Command::Stop).await
    }

    async fn command(
        &self,
        container_id: ContainerId,
        command: Command,
    ) -> ContainerLifecycleServiceResult<Container> {
        let (found, node) = self.find_commandable(container_id).await?;
        let clock = &*self.clock;
        let (requested, recorded) = modify_container(&*self.repository, found, |record| {
            let previous = record.status();
            match command.apply(record, clock) {
                Ok(()) => Change::Commit(Ok(previous)),
                Err(err) => Change::Skip(Err(err)),
            }
        })
        .await?;
        let previous = recorded?;

        let dispatched = match command {
            Command::Start => self.agent.start_container(&node, container_id).await,
            Command::Stop => self.agent.stop_container(&node, container_id).await,
        };
        if let Err(err) = dispatched {
            warn!(
                %container_id,
                node_id = %node.id(),
                command = command.name(),
                %err,
                "dispatch failed, withdrawing request"
            );
            self.withdraw(requested, command, previous).await?;
            return Err(err.into());
        }
        Ok(requested)
    }

    /// Puts a container whose command never reached the agent back to
    /// `previous`, unless it has left the requested status since.
    async fn withdraw(
        &self,
        requested: Container,
        command: Command,
        previous: ContainerStatus,
    ) -> ContainerLifecycleServiceResult<()> {
        let clock = &*self.clock;
        let pending = command.requested_status();
        let withdrawn = modify_container(&*self.repository, requested, |record| {
            if record.status() != pending {
                return Change::Skip(());
            }
            match record.withdraw_request(previous, clock) {
                Ok(()) => Change::Commit(()),
                Err(_) => Change::Skip(()),
            }
        })
        .await;
        match withdrawn {
            Ok(_) | Err(FleetRepositoryError::ContainerNotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Marks a container `deleting` and asks the agent to destroy it.
    ///
    /// The status is persisted before dispatch, so a failed dispatch can be
    /// retried by deleting again.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerLifecycleServiceError::NotFound`], domain errors
    /// for a deleted container, and agent or repository errors.
    pub async fn delete_container(
        &self,
        container_id: ContainerId,
    ) -> ContainerLifecycleServiceResult<DeletionOutcome> {
        let found = self.find_container_or_error(container_id).await?;
        let clock = &*self.clock;
        let (container, recorded) = modify_container(&*self.repository, found, |record| {
            match record.begin_delete(clock) {
                Ok(()) => Change::Commit(Ok(())),
                Err(err) => Change::Skip(Err(err)),
            }
        })
        .await?;
        recorded?;

        let Some(node) = self.repository.find_node(container.node_id()).await? else {
            self.repository.delete_container(container_id).await?;
            info!(%container_id, "purged container of deleted node");
            return Ok(DeletionOutcome::Purged);
        };
        self.agent.delete_container(&node, container_id).await?;
        Ok(DeletionOutcome::Pending(container))
    }

    /// Asks the agent for an external port mapped to `internal_port`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerLifecycleServiceError::ContainerUnavailable`] for a
    /// container being deleted, domain errors for an invalid port, and agent
    /// or repository errors.
    pub async fn allocate_port(
        &self,
        container_id: ContainerId,
        internal_port: u16,
        protocol: PortProtocol,
    ) -> ContainerLifecycleServiceResult<PortMapping> {
        let (found, node) = self.find_commandable(container_id).await?;
        let external_port = self
            .agent
            .allocate_port(&node, container_id, internal_port, protocol)
            .await?;
        let mapping = PortMapping::new(
            u32::from(internal_port),
            u32::from(external_port),
            protocol,
        )?;
        let clock = &*self.clock;
        modify_container(&*self.repository, found, |record| {
            record.add_port(mapping, clock);
            Change::Commit(())
        })
        .await?;
        Ok(mapping)
    }

    /// Installs a login credential inside the container.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerLifecycleServiceError::ContainerUnavailable`] for a
    /// container being deleted, and agent or repository errors.
    pub async fn configure_ssh(
        &self,
        container_id: ContainerId,
        username: &str,
        credential: &SshCredential,
    ) -> ContainerLifecycleServiceResult<()> {
        let (_, node) = self.find_commandable(container_id).await?;
        self.agent
            .configure_ssh(&node, container_id, username, credential)
            .await?;
        Ok(())
    }

    /// Finds a container by identifier.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find_container(
        &self,
        container_id: ContainerId,
    ) -> ContainerLifecycleServiceResult<Option<Container>> {
        Ok(self.repository.find_container(container_id).await?)
    }

    /// Finds the container owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find_container_by_owner(
        &self,
        owner: UserId,
    ) -> ContainerLifecycleServiceResult<Option<Container>> {
        Ok(self.repository.find_container_by_owner(owner).await?)
    }

    /// Lists all containers.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn list_containers(&self) -> ContainerLifecycleServiceResult<Vec<Container>> {
        Ok(self.repository.list_containers().await?)
    }
}
