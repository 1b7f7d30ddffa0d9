//! In-memory fleet repository with an optional JSON snapshot file.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::fleet::{
    domain::{Container, ContainerId, Node, NodeId, NodeName, NodeTokenDigest, UserId},
    ports::{FleetRepository, FleetRepositoryError, FleetRepositoryResult},
};

/// Thread-safe in-memory fleet repository.
///
/// When built with [`InMemoryFleetRepository::with_snapshot`], the state is
/// loaded from and written back to a JSON file on demand.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFleetRepository {
    state: Arc<RwLock<FleetState>>,
    snapshot: Option<SnapshotLocation>,
}

#[derive(Debug, Default)]
struct FleetState {
    nodes: HashMap<NodeId, Node>,
    name_index: HashMap<NodeName, NodeId>,
    token_index: HashMap<NodeTokenDigest, NodeId>,
    containers: HashMap<ContainerId, Container>,
    owner_index: HashMap<UserId, ContainerId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FleetSnapshot {
    nodes: Vec<Node>,
    containers: Vec<Container>,
}

#[derive(Debug, Clone)]
struct SnapshotLocation {
    directory: Utf8PathBuf,
    file_name: String,
}

impl SnapshotLocation {
    fn new(path: &Utf8Path) -> io::Result<Self> {
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("snapshot path '{path}' has no file name"),
            )
        })?;
        let directory = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Ok(Self {
            directory: directory.to_owned(),
            file_name: file_name.to_owned(),
        })
    }

    fn open_dir(&self) -> io::Result<Dir> {
        Dir::open_ambient_dir(&self.directory, ambient_authority())
    }
}

impl FleetState {
    fn from_snapshot(snapshot: FleetSnapshot) -> Self {
        let mut state = Self::default();
        for node in snapshot.nodes {
            state.index_node(node);
        }
        for container in snapshot.containers {
            state.owner_index.insert(container.owner(), container.id());
            state.containers.insert(container.id(), container);
        }
        state
    }

    fn to_snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            nodes: sorted_nodes(self.nodes.values().cloned().collect()),
            containers: self.containers.values().cloned().collect(),
        }
    }

    fn index_node(&mut self, node: Node) {
        self.name_index.insert(node.name().clone(), node.id());
        self.token_index
            .insert(node.token_digest().clone(), node.id());
        self.nodes.insert(node.id(), node);
    }
}

fn sorted_nodes(mut nodes: Vec<Node>) -> Vec<Node> {
    nodes.sort_by(|left, right| {
        left.created_at()
            .cmp(&right.created_at())
            .then_with(|| left.id().cmp(&right.id()))
    });
    nodes
}

fn lock_error(err: impl std::fmt::Display) -> FleetRepositoryError {
    FleetRepositoryError::persistence(io::Error::other(err.to_string()))
}

impl InMemoryFleetRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository backed by the snapshot at `path`.
    ///
    /// An absent file yields an empty repository.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRepositoryError::Persistence`] when the directory
    /// cannot be opened or the file cannot be read or decoded.
    pub fn with_snapshot(path: &Utf8Path) -> FleetRepositoryResult<Self> {
        let location = SnapshotLocation::new(path).map_err(FleetRepositoryError::persistence)?;
        let dir = location
            .open_dir()
            .map_err(FleetRepositoryError::persistence)?;
        let state = match dir.read_to_string(&location.file_name) {
            Ok(contents) => {
                let snapshot: FleetSnapshot =
                    serde_json::from_str(&contents).map_err(FleetRepositoryError::persistence)?;
                FleetState::from_snapshot(snapshot)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => FleetState::default(),
            Err(err) => return Err(FleetRepositoryError::persistence(err)),
        };
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            snapshot: Some(location),
        })
    }

    /// Writes the current state to the snapshot file, if one is configured.
    ///
    /// The file is replaced atomically through a temporary sibling.
    ///
    /// # Errors
    ///
    /// Returns [`FleetRepositoryError::Persistence`] when encoding or any
    /// filesystem operation fails.
    pub fn save_snapshot(&self) -> FleetRepositoryResult<()> {
        let Some(location) = &self.snapshot else {
            return Ok(());
        };
        let encoded = {
            let state = self.read()?;
            serde_json::to_vec_pretty(&state.to_snapshot())
                .map_err(FleetRepositoryError::persistence)?
        };
        let dir = location
            .open_dir()
            .map_err(FleetRepositoryError::persistence)?;
        let temporary = format!(".{}.tmp", location.file_name);
        dir.write(&temporary, encoded)
            .map_err(FleetRepositoryError::persistence)?;
        dir.rename(&temporary, &dir, &location.file_name)
            .map_err(FleetRepositoryError::persistence)
    }

    fn read(&self) -> FleetRepositoryResult<RwLockReadGuard<'_, FleetState>> {
        self.state.read().map_err(lock_error)
    }

    fn write(&self) -> FleetRepositoryResult<RwLockWriteGuard<'_, FleetState>> {
        self.state.write().map_err(lock_error)
    }
}

#[async_trait]
impl FleetRepository for InMemoryFleetRepository {
    async fn insert_node(&self, node: &Node) -> FleetRepositoryResult<()> {
        let mut state = self.write()?;

        if state.nodes.contains_key(&node.id()) {
            return Err(FleetRepositoryError::DuplicateNode(node.id()));
        }
        if state.name_index.contains_key(node.name()) {
            return Err(FleetRepositoryError::DuplicateNodeName(node.name().clone()));
        }

        state.index_node(node.clone());
        Ok(())
    }

    async fn update_node(&self, node: &Node) -> FleetRepositoryResult<Node> {
        let mut state = self.write()?;

        let stored = state
            .nodes
            .get_mut(&node.id())
            .ok_or(FleetRepositoryError::NodeNotFound(node.id()))?;
        if stored.revision() != node.revision() {
            return Err(FleetRepositoryError::NodeConflict(node.id()));
        }
        let mut next = node.clone();
        next.advance_revision();
        *stored = next.clone();
        Ok(next)
    }

    async fn delete_node(&self, node_id: NodeId) -> FleetRepositoryResult<()> {
        let mut state = self.write()?;

        let removed = state
            .nodes
            .remove(&node_id)
            .ok_or(FleetRepositoryError::NodeNotFound(node_id))?;
        state.name_index.remove(removed.name());
        state.token_index.remove(removed.token_digest());
        Ok(())
    }

    async fn find_node(&self, node_id: NodeId) -> FleetRepositoryResult<Option<Node>> {
        let state = self.read()?;
        Ok(state.nodes.get(&node_id).cloned())
    }

    async fn find_node_by_token(
        &self,
        digest: &NodeTokenDigest,
    ) -> FleetRepositoryResult<Option<Node>> {
        let state = self.read()?;
        Ok(state
            .token_index
            .get(digest)
            .and_then(|node_id| state.nodes.get(node_id))
            .cloned())
    }

    async fn list_nodes(&self) -> FleetRepositoryResult<Vec<Node>> {
        let state = self.read()?;
        Ok(sorted_nodes(state.nodes.values().cloned().collect()))
    }

    async fn insert_container(&self, container: &Container) -> FleetRepositoryResult<()> {
        let mut state = self.write()?;

        if state.owner_index.contains_key(&container.owner())
            || state.containers.contains_key(&container.id())
        {
            return Err(FleetRepositoryError::OwnerAlreadyAssigned(
                container.owner(),
            ));
        }

        state
            .owner_index
            .insert(container.owner(), container.id());
        state.containers.insert(container.id(), container.clone());
        Ok(())
    }

    async fn update_container(&self, container: &Container) -> FleetRepositoryResult<Container> {
        let mut state = self.write()?;

        let stored = state
            .containers
            .get_mut(&container.id())
            .ok_or(FleetRepositoryError::ContainerNotFound(container.id()))?;
        if stored.revision() != container.revision() {
            return Err(FleetRepositoryError::ContainerConflict(container.id()));
        }
        let mut next = container.clone();
        next.advance_revision();
        *stored = next.clone();
        Ok(next)
    }

    async fn delete_container(&self, container_id: ContainerId) -> FleetRepositoryResult<()> {
        let mut state = self.write()?;

        let removed = state
            .containers
            .remove(&container_id)
            .ok_or(FleetRepositoryError::ContainerNotFound(container_id))?;
        state.owner_index.remove(&removed.owner());
        Ok(())
    }

    async fn find_container(
        &self,
        container_id: ContainerId,
    ) -> FleetRepositoryResult<Option<Container>> {
        let state = self.read()?;
        Ok(state.containers.get(&container_id).cloned())
    }

    async fn find_container_by_owner(
        &self,
        owner: UserId,
    ) -> FleetRepositoryResult<Option<Container>> {
        let state = self.read()?;
        Ok(state
            .owner_index
            .get(&owner)
            .and_then(|container_id| state.containers.get(container_id))
            .cloned())
    }

    async fn list_containers_on_node(
        &self,
        node_id: NodeId,
    ) -> FleetRepositoryResult<Vec<Container>> {
        let state = self.read()?;
        Ok(state
            .containers
            .values()
            .filter(|container| container.node_id() == node_id)
            .cloned()
            .collect())
    }

    async fn list_containers(&self) -> FleetRepositoryResult<Vec<Container>> {
        let state = self.read()?;
        Ok(state.containers.values().cloned().collect())
    }
}
