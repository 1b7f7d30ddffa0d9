//! Error types for fleet domain validation and parsing.

use thiserror::Error;

/// Errors returned while constructing or mutating fleet domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FleetDomainError {
    /// The node name is empty after trimming.
    #[error("node name must not be empty")]
    EmptyNodeName,

    /// The node name contains characters outside `[a-z0-9-]`.
    #[error(
        "node name '{0}' contains invalid characters (only lowercase alphanumeric and hyphens allowed)"
    )]
    InvalidNodeName(String),

    /// The node name exceeds the 63-character hostname label limit.
    #[error("node name exceeds 63 character limit: {0}")]
    NodeNameTooLong(String),

    /// The node address is empty after trimming.
    #[error("node address must not be empty")]
    EmptyNodeAddress,

    /// The node address could not be parsed as `host` or `host:port`.
    #[error("invalid node address '{0}'")]
    InvalidNodeAddress(String),

    /// Every capacity dimension must be positive.
    #[error("capacity must be positive in every dimension: {0}")]
    InvalidCapacity(String),

    /// A port number was outside `1..=65535`.
    #[error("invalid port number: {0}")]
    InvalidPort(u32),

    /// Transitioning between two container states is invalid.
    #[error("invalid container status transition: {from} -> {to}")]
    InvalidLifecycleTransition {
        /// Current status.
        from: String,
        /// Requested target status.
        to: String,
    },
}

/// Error returned while parsing a container status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown container status: {0}")]
pub struct ParseContainerStatusError(pub String);

/// Error returned while parsing a port protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown port protocol: {0}")]
pub struct ParsePortProtocolError(pub String);
