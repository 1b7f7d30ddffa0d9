//! Error taxonomy for the SSH bastion.

use std::sync::Arc;
use thiserror::Error;

use crate::fleet::domain::ContainerId;

/// Errors raised while authenticating, routing or relaying a bastion
/// connection.
#[derive(Debug, Clone, Error)]
pub enum BastionError {
    /// The offered credential does not match the stored one.
    #[error("authentication failed for {username}")]
    AuthenticationError {
        /// Login name presented by the client.
        username: String,
    },
    /// The directory has no user with the presented login name.
    #[error("unknown user {0}")]
    UnknownUser(String),
    /// The user exists but has no credential for the offered method.
    #[error("user {0} has no credential configured for this method")]
    NoCredentialConfigured(String),
    /// The user has no container to relay into.
    #[error("user {0} has no container assigned")]
    NoContainerAssigned(String),
    /// The backend node could not be resolved, dialled or authenticated.
    #[error("node hosting container {container_id} is unreachable: {reason}")]
    NodeUnreachable {
        /// Container the connection was routed to.
        container_id: ContainerId,
        /// Human-readable failure detail.
        reason: String,
    },
    /// The backend refused to open a channel.
    #[error("channel rejected by backend ({reason_code}): {message}")]
    ChannelRejected {
        /// SSH channel-open failure reason code.
        reason_code: u32,
        /// Backend-supplied description.
        message: String,
    },
    /// The banner template failed to render.
    #[error("failed to render banner: {0}")]
    BannerRender(String),
    /// The user directory failed.
    #[error("user directory error: {0}")]
    Directory(Arc<dyn std::error::Error + Send + Sync>),
    /// A fleet registry lookup failed.
    #[error("fleet registry error: {0}")]
    Registry(Arc<dyn std::error::Error + Send + Sync>),
    /// The SSH transport failed.
    #[error("ssh transport error: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),
}

impl BastionError {
    /// Wraps a user directory failure.
    pub fn directory(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Directory(Arc::new(err))
    }

    /// Wraps a fleet registry failure.
    pub fn registry(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Registry(Arc::new(err))
    }

    /// Wraps a transport failure.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(err))
    }

    /// Builds an authentication failure for `username`.
    pub fn authentication(username: impl Into<String>) -> Self {
        Self::AuthenticationError {
            username: username.into(),
        }
    }

    /// Returns whether this failure is attributable to the client's
    /// credentials rather than to the gateway or its stores.
    #[must_use]
    pub const fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationError { .. }
                | Self::UnknownUser(_)
                | Self::NoCredentialConfigured(_)
        )
    }
}

/// Result type for bastion operations.
pub type BastionResult<T> = Result<T, BastionError>;
