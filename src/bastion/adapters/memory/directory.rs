//! In-memory user directory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock};

use crate::bastion::{
    domain::{BastionError, BastionResult, DirectoryUser},
    ports::UserDirectory,
};

/// Thread-safe in-memory user directory keyed by login name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<String, DirectoryUser>>>,
}

impl InMemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Directory`] when lock acquisition fails.
    pub fn upsert(&self, user: DirectoryUser) -> BastionResult<()> {
        let mut users = self.users.write().map_err(lock_error)?;
        users.insert(user.username.clone(), user);
        Ok(())
    }
}

fn lock_error(err: impl std::fmt::Display) -> BastionError {
    BastionError::directory(io::Error::other(err.to_string()))
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> BastionResult<Option<DirectoryUser>> {
        let users = self.users.read().map_err(lock_error)?;
        Ok(users.get(username).cloned())
    }
}
