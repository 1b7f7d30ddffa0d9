//! Outbound SSH sessions to the nodes hosting user containers.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ChannelEndpoint;
use crate::bastion::domain::{BastionResult, ChannelKind, GlobalReply, GlobalRequest};

/// Where and as whom to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    /// Node host name or address.
    pub host: String,
    /// Node SSH port.
    pub port: u16,
    /// Login name on the node.
    pub username: String,
}

/// A channel the backend opened towards the gateway, such as a
/// `forwarded-tcpip` connection.
#[derive(Debug)]
pub struct InboundChannel {
    /// Channel type and open payload.
    pub kind: ChannelKind,
    /// Backend side of the channel.
    pub endpoint: ChannelEndpoint,
}

/// An established backend session plus the channels the backend opens on
/// its own.
pub struct BackendLink {
    /// Session handle.
    pub session: Arc<dyn BackendSession>,
    /// Backend-initiated channels.
    pub inbound: mpsc::Receiver<InboundChannel>,
}

impl std::fmt::Debug for BackendLink {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("BackendLink").finish_non_exhaustive()
    }
}

/// Operations on an authenticated backend session.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Opens a channel of `kind`, carrying the same open payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::bastion::domain::BastionError::ChannelRejected`] with
    /// the backend's reason when it refuses, and transport errors.
    async fn open_channel(&self, kind: &ChannelKind) -> BastionResult<ChannelEndpoint>;

    /// Forwards a global request and returns the backend's answer,
    /// including the port it bound for a `tcpip-forward` on port 0.
    ///
    /// # Errors
    ///
    /// Returns transport errors.
    async fn global_request(&self, request: &GlobalRequest) -> BastionResult<GlobalReply>;

    /// Disconnects the session. Closing twice is a no-op.
    async fn close(&self);

    /// Token that fires once the session has ended for any reason.
    fn closed(&self) -> CancellationToken;
}

/// Dials and authenticates backend sessions.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Connects to `target` and authenticates as its username.
    ///
    /// # Errors
    ///
    /// Returns transport errors when the node cannot be reached or refuses
    /// the gateway's key.
    async fn connect(&self, target: &BackendTarget) -> BastionResult<BackendLink>;
}
