//! Warren: control plane and SSH bastion for a multi-tenant container fleet.
//!
//! Worker nodes run an agent that registers with the control plane and
//! heartbeats its container statuses. Each user owns at most one container,
//! placed on an online node with spare capacity. Users reach their container
//! through a single SSH endpoint that relays the session to whichever node
//! hosts it.
//!
//! # Architecture
//!
//! Each bounded context follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (memory, HTTP, SSH)
//! - **Services**: Orchestration over ports
//!
//! # Modules
//!
//! - [`fleet`]: Node registry, liveness, placement and container lifecycle
//! - [`bastion`]: SSH gateway authentication, routing and relaying
//! - [`api`]: HTTP routes for node agents and administrators
//! - [`config`]: `warren.toml` settings

pub mod api;
pub mod bastion;
pub mod clock;
pub mod config;
pub mod fleet;
pub mod shutdown;
pub mod telemetry;
