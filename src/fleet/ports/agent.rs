//! Node agent port: commands the control plane sends to a hosting node.
//!
//! The agent performs the runtime work (create, start, stop, destroy a
//! sandbox) out of band and confirms results through status reports.

use crate::fleet::domain::{ContainerId, Node, PortProtocol, Resources, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for node agent operations.
pub type NodeAgentResult<T> = Result<T, NodeAgentError>;

/// Everything an agent needs to provision a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionSpec {
    /// Container to create.
    pub container_id: ContainerId,
    /// Owning user.
    pub user_id: UserId,
    /// Owning user's login name.
    pub username: String,
    /// Container name on the node.
    pub name: String,
    /// Resource slice to reserve.
    pub allocation: Resources,
}

/// Login credential to install inside a container.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshCredential {
    /// OpenSSH `authorized_keys` line.
    PublicKey(String),
    /// Plaintext password for the in-container account.
    Password(String),
}

impl fmt::Debug for SshCredential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublicKey(key) => formatter.debug_tuple("PublicKey").field(key).finish(),
            Self::Password(_) => formatter.write_str("Password(<redacted>)"),
        }
    }
}

/// Command contract towards the agent running on a node.
#[async_trait]
pub trait NodeAgent: Send + Sync {
    /// Asks the agent to provision a container.
    async fn create_container(&self, node: &Node, spec: &ProvisionSpec) -> NodeAgentResult<()>;

    /// Asks the agent to start a stopped container.
    async fn start_container(&self, node: &Node, container_id: ContainerId)
    -> NodeAgentResult<()>;

    /// Asks the agent to stop a running container.
    async fn stop_container(&self, node: &Node, container_id: ContainerId) -> NodeAgentResult<()>;

    /// Asks the agent to destroy a container.
    async fn delete_container(&self, node: &Node, container_id: ContainerId)
    -> NodeAgentResult<()>;

    /// Asks the agent to expose `internal_port`, returning the external port.
    async fn allocate_port(
        &self,
        node: &Node,
        container_id: ContainerId,
        internal_port: u16,
        protocol: PortProtocol,
    ) -> NodeAgentResult<u16>;

    /// Asks the agent to install a login credential inside the container.
    async fn configure_ssh(
        &self,
        node: &Node,
        container_id: ContainerId,
        username: &str,
        credential: &SshCredential,
    ) -> NodeAgentResult<()>;
}

/// Errors returned by node agent adapters.
#[derive(Debug, Clone, Error)]
pub enum NodeAgentError {
    /// The agent could not be reached.
    #[error("node agent unreachable: {0}")]
    Unreachable(Arc<dyn std::error::Error + Send + Sync>),

    /// The agent refused the command.
    #[error("node agent rejected the request with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The agent answered with an unexpected payload.
    #[error("invalid node agent response: {0}")]
    InvalidResponse(String),
}

impl NodeAgentError {
    /// Wraps a transport failure.
    pub fn unreachable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unreachable(Arc::new(err))
    }
}
