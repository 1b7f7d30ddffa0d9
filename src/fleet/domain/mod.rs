//! Domain model for the fleet registry.
//!
//! Nodes, their capacity and liveness, and the per-user containers placed on
//! them. Liveness is derived from heartbeat receipt times and never set
//! directly.

mod container;
mod error;
mod heartbeat;
mod ids;
mod node;
mod resources;

pub use container::{
    Container, ContainerStatus, PersistedContainerData, PortMapping, PortProtocol,
};
pub use error::{FleetDomainError, ParseContainerStatusError, ParsePortProtocolError};
pub use heartbeat::{ContainerStatusReport, HeartbeatReport, ReconcileOutcome};
pub use ids::{ContainerId, NodeId, UserId};
pub use node::{
    Node, NodeAddress, NodeName, NodeToken, NodeTokenDigest, PersistedNodeData, ReportOrdering,
};
pub use resources::Resources;
