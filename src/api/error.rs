//! Mapping from service errors to HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::fleet::{
    domain::FleetDomainError,
    ports::FleetRepositoryError,
    services::{ContainerLifecycleServiceError, FleetRegistryServiceError},
};

/// Error returned by API handlers, rendered as `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Creates an error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Missing or wrong bearer token.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// Unknown resource.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Returns the response status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        } else {
            debug!(status = %self.status, error = %self.message, "request rejected");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

const fn domain_status(err: &FleetDomainError) -> StatusCode {
    match err {
        FleetDomainError::InvalidLifecycleTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

const fn repository_status(err: &FleetRepositoryError) -> StatusCode {
    match err {
        FleetRepositoryError::DuplicateNode(_)
        | FleetRepositoryError::DuplicateNodeName(_)
        | FleetRepositoryError::OwnerAlreadyAssigned(_)
        | FleetRepositoryError::NodeConflict(_)
        | FleetRepositoryError::ContainerConflict(_) => StatusCode::CONFLICT,
        FleetRepositoryError::NodeNotFound(_) | FleetRepositoryError::ContainerNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        FleetRepositoryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

const fn registry_status(err: &FleetRegistryServiceError) -> StatusCode {
    match err {
        FleetRegistryServiceError::Domain(inner) => domain_status(inner),
        FleetRegistryServiceError::Repository(inner) => repository_status(inner),
        FleetRegistryServiceError::AuthenticationError => StatusCode::UNAUTHORIZED,
        FleetRegistryServiceError::PlacementUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        FleetRegistryServiceError::NodeNotFound(_) => StatusCode::NOT_FOUND,
    }
}

const fn lifecycle_status(err: &ContainerLifecycleServiceError) -> StatusCode {
    match err {
        ContainerLifecycleServiceError::Domain(inner) => domain_status(inner),
        ContainerLifecycleServiceError::Repository(inner) => repository_status(inner),
        ContainerLifecycleServiceError::Registry(inner) => registry_status(inner),
        ContainerLifecycleServiceError::Agent(_) => StatusCode::BAD_GATEWAY,
        ContainerLifecycleServiceError::ContainerAlreadyAssigned(_)
        | ContainerLifecycleServiceError::ContainerUnavailable { .. } => StatusCode::CONFLICT,
        ContainerLifecycleServiceError::NotFound(_)
        | ContainerLifecycleServiceError::NodeNotFound(_) => StatusCode::NOT_FOUND,
    }
}

impl From<FleetRegistryServiceError> for ApiError {
    fn from(err: FleetRegistryServiceError) -> Self {
        Self::new(registry_status(&err), err.to_string())
    }
}

impl From<ContainerLifecycleServiceError> for ApiError {
    fn from(err: ContainerLifecycleServiceError) -> Self {
        Self::new(lifecycle_status(&err), err.to_string())
    }
}
