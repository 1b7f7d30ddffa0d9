//! Credential checks and routing-context resolution for inbound
//! connections.

use std::sync::Arc;

use tracing::{info, warn};

use crate::bastion::{
    domain::{
        AuthorizedKey, BastionError, BastionResult, ConnectionContext, DirectoryUser,
        OfferedCredential, PasswordHash,
    },
    ports::UserDirectory,
};
use crate::fleet::ports::FleetRepository;

/// Authenticates SSH logins against the user directory and resolves the
/// user's container and hosting node from the fleet registry.
pub struct Authenticator<D, R>
where
    D: UserDirectory,
    R: FleetRepository,
{
    directory: Arc<D>,
    fleet: Arc<R>,
}

impl<D, R> Clone for Authenticator<D, R>
where
    D: UserDirectory,
    R: FleetRepository,
{
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            fleet: Arc::clone(&self.fleet),
        }
    }
}

impl<D, R> Authenticator<D, R>
where
    D: UserDirectory,
    R: FleetRepository,
{
    /// Creates an authenticator over the given stores.
    #[must_use]
    pub const fn new(directory: Arc<D>, fleet: Arc<R>) -> Self {
        Self { directory, fleet }
    }

    /// Verifies `offered` for `username` and builds the connection context.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::UnknownUser`] when the directory has no such
    /// user, [`BastionError::NoCredentialConfigured`] when the user has no
    /// credential for the offered method, [`BastionError::AuthenticationError`]
    /// on mismatch, and directory or registry failures.
    pub async fn authenticate(
        &self,
        username: &str,
        offered: OfferedCredential,
    ) -> BastionResult<ConnectionContext> {
        let user = self
            .directory
            .find_by_username(username)
            .await?
            .ok_or_else(|| BastionError::UnknownUser(username.to_owned()))?;

        match offered {
            OfferedCredential::PublicKey(wire) => verify_public_key(&user, &wire)?,
            OfferedCredential::Password(password) => verify_password(&user, password).await?,
        }

        let context = self.resolve(user).await?;
        info!(
            username = %context.username,
            container_id = ?context.container_id,
            node = ?context.node_address.as_ref().map(ToString::to_string),
            "user authenticated"
        );
        Ok(context)
    }

    async fn resolve(&self, user: DirectoryUser) -> BastionResult<ConnectionContext> {
        let container = self
            .fleet
            .find_container_by_owner(user.id)
            .await
            .map_err(BastionError::registry)?;
        let node_address = match &container {
            Some(container) => self
                .fleet
                .find_node(container.node_id())
                .await
                .map_err(BastionError::registry)?
                .map(|node| node.address().clone()),
            None => None,
        };
        Ok(ConnectionContext {
            user_id: user.id,
            username: user.username,
            container_id: container.map(|container| container.id()),
            node_address,
        })
    }
}

fn verify_public_key(user: &DirectoryUser, offered: &[u8]) -> BastionResult<()> {
    let stored: &AuthorizedKey = user
        .public_key
        .as_ref()
        .ok_or_else(|| BastionError::NoCredentialConfigured(user.username.clone()))?;
    if stored.matches(offered) {
        Ok(())
    } else {
        Err(BastionError::authentication(&user.username))
    }
}

async fn verify_password(user: &DirectoryUser, password: String) -> BastionResult<()> {
    let stored: PasswordHash = user
        .password_hash
        .clone()
        .ok_or_else(|| BastionError::NoCredentialConfigured(user.username.clone()))?;

    let verdict = tokio::task::spawn_blocking(move || bcrypt::verify(password, stored.as_str()))
        .await
        .map_err(BastionError::transport)?;
    match verdict {
        Ok(true) => Ok(()),
        Ok(false) => Err(BastionError::authentication(&user.username)),
        Err(err) => {
            warn!(username = %user.username, %err, "stored password hash is unusable");
            Err(BastionError::authentication(&user.username))
        }
    }
}
