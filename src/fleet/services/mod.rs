//! Service layer for fleet registry and container lifecycle orchestration.

mod lifecycle;
mod monitor;
mod placement;
mod registry;
mod retry;

pub use lifecycle::{
    ContainerLifecycleService, ContainerLifecycleServiceError, ContainerLifecycleServiceResult,
    DeletionOutcome, RequestContainer,
};
pub use monitor::LivenessMonitor;
pub use placement::{FirstFit, LeastLoaded, NodeLoad, PlacementPolicy, PlacementStrategy};
pub use registry::{
    DEFAULT_HEARTBEAT_TIMEOUT_SECS, FleetRegistryService, FleetRegistryServiceError,
    FleetRegistryServiceResult, HeartbeatOutcome, ProvisionNodeRequest,
};
