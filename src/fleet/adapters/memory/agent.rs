//! In-memory node agent that records commands instead of sending them.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use crate::fleet::{
    domain::{ContainerId, Node, NodeId, PortProtocol},
    ports::{NodeAgent, NodeAgentError, NodeAgentResult, ProvisionSpec, SshCredential},
};

/// First external port handed out by the in-memory agent.
const FIRST_EXTERNAL_PORT: u16 = 20_000;

/// Command observed by [`InMemoryNodeAgent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Provisioning request.
    Create(ProvisionSpec),
    /// Start request.
    Start(ContainerId),
    /// Stop request.
    Stop(ContainerId),
    /// Destroy request.
    Delete(ContainerId),
    /// Port allocation request.
    AllocatePort {
        /// Target container.
        container_id: ContainerId,
        /// Port inside the container.
        internal_port: u16,
        /// Transport protocol.
        protocol: PortProtocol,
    },
    /// Credential installation request.
    ConfigureSsh {
        /// Target container.
        container_id: ContainerId,
        /// Account name inside the container.
        username: String,
        /// Credential to install.
        credential: SshCredential,
    },
}

/// In-memory node agent adapter.
///
/// Commands are appended to a log together with the node they were sent to.
/// The agent can be switched into a failing mode to exercise rollback paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeAgent {
    state: Arc<RwLock<AgentState>>,
}

#[derive(Debug, Default)]
struct AgentState {
    commands: Vec<(NodeId, AgentCommand)>,
    failure: Option<String>,
    next_port: Option<u16>,
}

impl InMemoryNodeAgent {
    /// Creates an agent that accepts every command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following command fail with `message`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeAgentError::Unreachable`] when lock acquisition fails.
    pub fn fail_with(&self, message: impl Into<String>) -> NodeAgentResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.failure = Some(message.into());
        Ok(())
    }

    /// Makes following commands succeed again.
    ///
    /// # Errors
    ///
    /// Returns [`NodeAgentError::Unreachable`] when lock acquisition fails.
    pub fn recover(&self) -> NodeAgentResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        state.failure = None;
        Ok(())
    }

    /// Returns the recorded commands in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`NodeAgentError::Unreachable`] when lock acquisition fails.
    pub fn commands(&self) -> NodeAgentResult<Vec<(NodeId, AgentCommand)>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.commands.clone())
    }

    fn record(&self, node: &Node, command: AgentCommand) -> NodeAgentResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        if let Some(message) = &state.failure {
            return Err(NodeAgentError::Rejected {
                status: 500,
                body: message.clone(),
            });
        }
        state.commands.push((node.id(), command));
        Ok(())
    }

    fn next_port(&self) -> NodeAgentResult<u16> {
        let mut state = self.state.write().map_err(lock_error)?;
        let port = state.next_port.unwrap_or(FIRST_EXTERNAL_PORT);
        state.next_port = Some(port.saturating_add(1));
        Ok(port)
    }
}

fn lock_error(err: impl std::fmt::Display) -> NodeAgentError {
    NodeAgentError::unreachable(std::io::Error::other(err.to_string()))
}

#[async_trait]
impl NodeAgent for InMemoryNodeAgent {
    async fn create_container(&self, node: &Node, spec: &ProvisionSpec) -> NodeAgentResult<()> {
        self.record(node, AgentCommand::Create(spec.clone()))
    }

    async fn start_container(
        &self,
        node: &Node,
        container_id: ContainerId,
    ) -> NodeAgentResult<()> {
        self.record(node, AgentCommand::Start(container_id))
    }

    async fn stop_container(&self, node: &Node, container_id: ContainerId) -> NodeAgentResult<()> {
        self.record(node, AgentCommand::Stop(container_id))
    }

    async fn delete_container(
        &self,
        node: &Node,
        container_id: ContainerId,
    ) -> NodeAgentResult<()> {
        self.record(node, AgentCommand::Delete(container_id))
    }

    async fn allocate_port(
        &self,
        node: &Node,
        container_id: ContainerId,
        internal_port: u16,
        protocol: PortProtocol,
    ) -> NodeAgentResult<u16> {
        self.record(
            node,
            AgentCommand::AllocatePort {
                container_id,
                internal_port,
                protocol,
            },
        )?;
        self.next_port()
    }

    async fn configure_ssh(
        &self,
        node: &Node,
        container_id: ContainerId,
        username: &str,
        credential: &SshCredential,
    ) -> NodeAgentResult<()> {
        self.record(
            node,
            AgentCommand::ConfigureSsh {
                container_id,
                username: username.to_owned(),
                credential: credential.clone(),
            },
        )
    }
}
