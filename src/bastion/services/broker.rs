//! Routing of authenticated connections: banner for users without a
//! container, a bounded backend dial for everyone else.

use std::sync::Arc;
use std::time::Duration;

use minijinja::{Environment, context};
use tracing::{info, warn};

use crate::bastion::{
    domain::{BastionError, BastionResult, ConnectionContext, Route},
    ports::{BackendConnector, BackendLink, BackendTarget},
};

/// Banner shown to users who have no container yet.
pub const DEFAULT_BANNER: &str = "hey there {{ username }}!\r\n\r\n\
you don't have a container yet. create one from the dashboard, \
then connect again.\r\n";

/// What to do with an authenticated connection.
#[derive(Debug)]
pub enum SessionPlan {
    /// Accept only session channels, write this text and close.
    Banner(String),
    /// Relay every channel and global request through this backend session.
    Relay(BackendLink),
}

/// Decides and prepares the session for each authenticated connection.
pub struct SessionBroker<B>
where
    B: BackendConnector,
{
    connector: Arc<B>,
    banner: String,
    dial_timeout: Duration,
    default_port: u16,
}

impl<B> Clone for SessionBroker<B>
where
    B: BackendConnector,
{
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            banner: self.banner.clone(),
            dial_timeout: self.dial_timeout,
            default_port: self.default_port,
        }
    }
}

impl<B> SessionBroker<B>
where
    B: BackendConnector,
{
    /// Creates a broker with the default banner.
    #[must_use]
    pub fn new(connector: Arc<B>, dial_timeout: Duration, default_port: u16) -> Self {
        Self {
            connector,
            banner: DEFAULT_BANNER.to_owned(),
            dial_timeout,
            default_port,
        }
    }

    /// Replaces the banner template. The template sees `username`.
    #[must_use]
    pub fn with_banner(mut self, template: impl Into<String>) -> Self {
        self.banner = template.into();
        self
    }

    /// Renders the banner for `username`.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::BannerRender`] when the template is invalid.
    pub fn render_banner(&self, username: &str) -> BastionResult<String> {
        Environment::new()
            .render_str(&self.banner, context! { username })
            .map_err(|err| BastionError::BannerRender(err.to_string()))
    }

    /// Resolves the connection's route and prepares the session.
    ///
    /// Users without a container never cause a backend dial. The dial is
    /// bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::NodeUnreachable`] when the hosting node is
    /// gone, the dial times out or fails, and banner rendering errors.
    pub async fn open(&self, context: &ConnectionContext) -> BastionResult<SessionPlan> {
        match context.route() {
            Route::NoContainer => {
                info!(username = %context.username, "no container assigned, sending banner");
                self.render_banner(&context.username).map(SessionPlan::Banner)
            }
            Route::Unroutable(container_id) => {
                warn!(
                    username = %context.username,
                    %container_id,
                    "container has no resolvable hosting node"
                );
                Err(BastionError::NodeUnreachable {
                    container_id,
                    reason: "hosting node not found".to_owned(),
                })
            }
            Route::Backend {
                container_id,
                address,
            } => {
                let target = BackendTarget {
                    host: address.host().to_owned(),
                    port: address.ssh_port_or(self.default_port),
                    username: context.username.clone(),
                };
                let dial_failed = |reason: String| {
                    warn!(
                        username = %context.username,
                        %container_id,
                        host = %target.host,
                        port = target.port,
                        %reason,
                        "backend dial failed"
                    );
                    BastionError::NodeUnreachable {
                        container_id,
                        reason,
                    }
                };

                let link = tokio::time::timeout(self.dial_timeout, self.connector.connect(&target))
                    .await
                    .map_err(|_| {
                        dial_failed(format!("dial timed out after {:?}", self.dial_timeout))
                    })?
                    .map_err(|err| dial_failed(err.to_string()))?;
                info!(
                    username = %context.username,
                    %container_id,
                    host = %target.host,
                    port = target.port,
                    "backend session established"
                );
                Ok(SessionPlan::Relay(link))
            }
        }
    }
}
