//! HTTP surface of the control plane.
//!
//! Node agents authenticate with the bearer token issued when their node was
//! provisioned and use the registration, heartbeat and status routes.
//! Administrators use the `/api/admin` routes with the configured admin
//! token; those routes are not mounted when no admin token is configured.

mod admin;
mod auth;
mod error;
mod nodes;

use std::io;
use std::sync::Arc;

use axum::{Router, routing::post};
use mockable::Clock;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::fleet::{
    domain::Resources,
    ports::{FleetRepository, NodeAgent},
    services::{ContainerLifecycleService, FleetRegistryService},
};

pub use error::ApiError;

/// Interval advertised to agents when none is configured.
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Services and settings shared by every handler.
pub struct ApiState<R, A, C>
where
    R: FleetRepository,
    A: NodeAgent,
    C: Clock + Send + Sync,
{
    registry: FleetRegistryService<R, C>,
    lifecycle: ContainerLifecycleService<R, A, C>,
    admin_token: Option<String>,
    default_allocation: Resources,
    heartbeat_interval_secs: u64,
}

impl<R, A, C> ApiState<R, A, C>
where
    R: FleetRepository,
    A: NodeAgent,
    C: Clock + Send + Sync,
{
    /// Creates state with admin routes disabled and the default allocation.
    #[must_use]
    pub const fn new(
        registry: FleetRegistryService<R, C>,
        lifecycle: ContainerLifecycleService<R, A, C>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            admin_token: None,
            default_allocation: Resources::DEFAULT,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
        }
    }

    /// Enables the admin routes behind `token`.
    #[must_use]
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// Sets the allocation for containers requested without one.
    #[must_use]
    pub const fn with_default_allocation(mut self, allocation: Resources) -> Self {
        self.default_allocation = allocation;
        self
    }

    /// Sets the heartbeat interval advertised to registering agents.
    #[must_use]
    pub const fn with_heartbeat_interval_secs(mut self, seconds: u64) -> Self {
        self.heartbeat_interval_secs = seconds;
        self
    }
}

/// Builds the API router.
#[must_use]
pub fn router<R, A, C>(state: ApiState<R, A, C>) -> Router
where
    R: FleetRepository + 'static,
    A: NodeAgent + 'static,
    C: Clock + Send + Sync + 'static,
{
    let admin_token = state.admin_token.clone();
    let node_routes = Router::new()
        .route("/api/nodes/register", post(nodes::register::<R, A, C>))
        .route("/api/nodes/heartbeat", post(nodes::heartbeat::<R, A, C>))
        .route(
            "/api/containers/:id/status",
            post(nodes::report_status::<R, A, C>),
        );
    let routes = match admin_token {
        Some(token) => node_routes.merge(admin::routes::<R, A, C>(Arc::from(token))),
        None => node_routes,
    };
    routes.with_state(Arc::new(state))
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        info!(%address, "API listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
