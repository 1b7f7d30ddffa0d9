//! Fleet registry and container placement for Warren.
//!
//! Tracks worker nodes, their capacity and liveness, and the per-user
//! containers they host. Node agents register and heartbeat into the
//! registry; placement picks an online node for each new container; status
//! reports drive the container state machine. The module follows hexagonal
//! architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
