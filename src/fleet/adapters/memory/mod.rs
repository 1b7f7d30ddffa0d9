//! In-memory adapters for the fleet registry ports.

mod agent;
mod repository;

pub use agent::{AgentCommand, InMemoryNodeAgent};
pub use repository::InMemoryFleetRepository;
