//! Per-connection state carried forward from authentication.

use crate::fleet::domain::{ContainerId, NodeAddress, UserId};

/// What an authenticated connection resolved to.
///
/// Resolved once at authentication time and never refreshed for the life of
/// the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Authenticated user.
    pub user_id: UserId,
    /// Login name, also used as the backend login.
    pub username: String,
    /// The user's container, when one is assigned.
    pub container_id: Option<ContainerId>,
    /// Address of the node hosting the container, when it still exists.
    pub node_address: Option<NodeAddress>,
}

/// Routing decision derived from a [`ConnectionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Nothing to relay into: greet with a banner and close.
    NoContainer,
    /// A container is assigned but its hosting node is gone.
    Unroutable(ContainerId),
    /// Relay into the container's hosting node.
    Backend {
        /// Container being reached.
        container_id: ContainerId,
        /// Hosting node address.
        address: &'a NodeAddress,
    },
}

impl ConnectionContext {
    /// Returns the routing decision for this connection.
    #[must_use]
    pub fn route(&self) -> Route<'_> {
        match (self.container_id, self.node_address.as_ref()) {
            (None, _) => Route::NoContainer,
            (Some(container_id), None) => Route::Unroutable(container_id),
            (Some(container_id), Some(address)) => Route::Backend {
                container_id,
                address,
            },
        }
    }
}
