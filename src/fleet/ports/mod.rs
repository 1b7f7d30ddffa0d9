//! Port contracts for fleet persistence and node agent commands.

mod agent;
mod repository;

pub use agent::{NodeAgent, NodeAgentError, NodeAgentResult, ProvisionSpec, SshCredential};
pub use repository::{FleetRepository, FleetRepositoryError, FleetRepositoryResult};
