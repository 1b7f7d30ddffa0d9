//! Read-modify-write loops over revision-checked repository updates.

use crate::fleet::{
    domain::{Container, Node},
    ports::{FleetRepository, FleetRepositoryError, FleetRepositoryResult},
};
use tracing::debug;

/// Attempts before a contended record is reported as a conflict.
const WRITE_ATTEMPTS: usize = 16;

/// What a change closure decided for the copy it was given.
pub(super) enum Change<T> {
    /// Store the modified copy.
    Commit(T),
    /// Leave the stored record as it is.
    Skip(T),
}

/// Applies `change` to `node` and stores it, re-reading and re-applying
/// whenever another writer got there first.
///
/// Returns the stored copy on commit, or the last copy `change` saw on skip.
pub(super) async fn modify_node<R, T, F>(
    repository: &R,
    node: Node,
    mut change: F,
) -> FleetRepositoryResult<(Node, T)>
where
    R: FleetRepository + ?Sized,
    F: FnMut(&mut Node) -> Change<T> + Send,
    T: Send,
{
    let node_id = node.id();
    let mut current = node;
    for _ in 0..WRITE_ATTEMPTS {
        let mut candidate = current.clone();
        let result = match change(&mut candidate) {
            Change::Skip(result) => return Ok((candidate, result)),
            Change::Commit(result) => result,
        };
        match repository.update_node(&candidate).await {
            Ok(stored) => return Ok((stored, result)),
            Err(FleetRepositoryError::NodeConflict(_)) => {
                debug!(%node_id, "node changed underneath, retrying");
                current = repository
                    .find_node(node_id)
                    .await?
                    .ok_or(FleetRepositoryError::NodeNotFound(node_id))?;
            }
            Err(err) => return Err(err),
        }
    }
    Err(FleetRepositoryError::NodeConflict(node_id))
}

/// Container counterpart of [`modify_node`].
pub(super) async fn modify_container<R, T, F>(
    repository: &R,
    container: Container,
    mut change: F,
) -> FleetRepositoryResult<(Container, T)>
where
    R: FleetRepository + ?Sized,
    F: FnMut(&mut Container) -> Change<T> + Send,
    T: Send,
{
    let container_id = container.id();
    let mut current = container;
    for _ in 0..WRITE_ATTEMPTS {
        let mut candidate = current.clone();
        let result = match change(&mut candidate) {
            Change::Skip(result) => return Ok((candidate, result)),
            Change::Commit(result) => result,
        };
        match repository.update_container(&candidate).await {
            Ok(stored) => return Ok((stored, result)),
            Err(FleetRepositoryError::ContainerConflict(_)) => {
                debug!(%container_id, "container changed underneath, retrying");
                current = repository
                    .find_container(container_id)
                    .await?
                    .ok_or(FleetRepositoryError::ContainerNotFound(container_id))?;
            }
            Err(err) => return Err(err),
        }
    }
    Err(FleetRepositoryError::ContainerConflict(container_id))
}
