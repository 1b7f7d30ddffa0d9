//! Read-only access to the identity service's user directory.

use async_trait::async_trait;

use crate::bastion::domain::{BastionResult, DirectoryUser};

/// User directory lookups.
///
/// Implementations are queried on every authentication attempt and must
/// not cache entries across calls.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Finds the user whose SSH login name is `username`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::bastion::domain::BastionError::Directory`] when the
    /// backing store fails.
    async fn find_by_username(&self, username: &str) -> BastionResult<Option<DirectoryUser>>;
}
