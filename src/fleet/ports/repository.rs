//! Repository port for fleet registry persistence.

use crate::fleet::domain::{Container, ContainerId, Node, NodeId, NodeName, NodeTokenDigest, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for fleet repository operations.
pub type FleetRepositoryResult<T> = Result<T, FleetRepositoryError>;

/// Persistence contract for nodes and containers.
///
/// Implementations are the single source of truth for the container to
/// owner relation: a user's container reference exists exactly while a
/// container row with that owner exists.
#[async_trait]
pub trait FleetRepository: Send + Sync {
    /// Stores a newly provisioned node.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRepositoryError::DuplicateNode`] when the identifier
    /// exists or [`FleetRepositoryError::DuplicateNodeName`] when the name is
    /// taken.
    async fn insert_node(&self, node: &Node) -> FleetRepositoryResult<()>;

    /// Persists changes to an existing node and returns the stored copy.
    ///
    /// The write only succeeds when `node` was read at the stored revision;
    /// the stored copy carries the next one.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRepositoryError::NodeNotFound`] when the node does not
    /// exist and [`FleetRepositoryError::NodeConflict`] when it was written
    /// since `node` was read.
    async fn update_node(&self, node: &Node) -> FleetRepositoryResult<Node>;

    /// Removes a node record.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRepositoryError::NodeNotFound`] when the node does not
    /// exist.
    async fn delete_node(&self, node_id: NodeId) -> FleetRepositoryResult<()>;

    /// Finds a node by identifier.
    async fn find_node(&self, node_id: NodeId) -> FleetRepositoryResult<Option<Node>>;

    /// Finds the node that was issued the token with `digest`.
    async fn find_node_by_token(
        &self,
        digest: &NodeTokenDigest,
    ) -> FleetRepositoryResult<Option<Node>>;

    /// Returns every node ordered by creation time, then identifier.
    async fn list_nodes(&self) -> FleetRepositoryResult<Vec<Node>>;

    /// Stores a newly placed container.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRepositoryError::OwnerAlreadyAssigned`] when the owner
    /// already has a container.
    async fn insert_container(&self, container: &Container) -> FleetRepositoryResult<()>;

    /// Persists changes to an existing container and returns the stored
    /// copy.
    ///
    /// Revisions are checked as for [`FleetRepository::update_node`].
    ///
    /// # Errors
    ///
    /// Returns [`FleetRepositoryError::ContainerNotFound`] when the container
    /// does not exist and [`FleetRepositoryError::ContainerConflict`] when it
    /// was written since `container` was read.
    async fn update_container(&self, container: &Container) -> FleetRepositoryResult<Container>;

    /// Purges a container row, which also clears its owner's reference.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRepositoryError::ContainerNotFound`] when the container
    /// does not exist.
    async fn delete_container(&self, container_id: ContainerId) -> FleetRepositoryResult<()>;

    /// Finds a container by identifier.
    async fn find_container(
        &self,
        container_id: ContainerId,
    ) -> FleetRepositoryResult<Option<Container>>;

    /// Finds the container owned by `owner`.
    async fn find_container_by_owner(
        &self,
        owner: UserId,
    ) -> FleetRepositoryResult<Option<Container>>;

    /// Returns the containers assigned to `node_id`.
    async fn list_containers_on_node(
        &self,
        node_id: NodeId,
    ) -> FleetRepositoryResult<Vec<Container>>;

    /// Returns every container.
    async fn list_containers(&self) -> FleetRepositoryResult<Vec<Container>>;
}

/// Errors returned by fleet repository implementations.
#[derive(Debug, Clone, Error)]
pub enum FleetRepositoryError {
    /// A node with the same identifier already exists.
    #[error("duplicate node identifier: {0}")]
    DuplicateNode(NodeId),

    /// A node with the same name already exists.
    #[error("duplicate node name: {0}")]
    DuplicateNodeName(NodeName),

    /// The node was not found.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The node was written by someone else since it was read.
    #[error("node {0} changed concurrently")]
    NodeConflict(NodeId),

    /// The owner already has a container.
    #[error("user {0} already has a container")]
    OwnerAlreadyAssigned(UserId),

    /// The container was not found.
    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),

    /// The container was written by someone else since it was read.
    #[error("container {0} changed concurrently")]
    ContainerConflict(ContainerId),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl FleetRepositoryError {
    /// Wraps a persistence-layer failure.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
