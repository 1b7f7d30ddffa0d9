//! Users as read from the identity service's directory.

use serde::{Deserialize, Serialize};

use super::{AuthorizedKey, PasswordHash};
use crate::fleet::domain::UserId;

/// A directory entry consumed by the bastion.
///
/// The bastion never creates or modifies these; it only reads the login
/// name and credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    /// User identifier shared with the fleet registry.
    pub id: UserId,
    /// SSH login name.
    pub username: String,
    /// Stored public key, when the user uploaded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<AuthorizedKey>,
    /// Stored password hash, when the user set a password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<PasswordHash>,
}

impl DirectoryUser {
    /// Creates a user without credentials.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            public_key: None,
            password_hash: None,
        }
    }

    /// Attaches a stored public key.
    #[must_use]
    pub fn with_public_key(mut self, key: AuthorizedKey) -> Self {
        self.public_key = Some(key);
        self
    }

    /// Attaches a stored password hash.
    #[must_use]
    pub fn with_password_hash(mut self, hash: PasswordHash) -> Self {
        self.password_hash = Some(hash);
        self
    }
}
