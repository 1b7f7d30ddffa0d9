//! Transport-neutral view of one open SSH channel.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bastion::domain::{BastionResult, ChannelEvent, ChannelRequest};

/// Out-of-band operations on an open channel.
#[async_trait]
pub trait ChannelControl: Send + Sync {
    /// Sends a channel request to the peer.
    ///
    /// Returns the peer's verdict when the request wants a reply, and `true`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`crate::bastion::domain::BastionError::Transport`] when the
    /// channel is gone.
    async fn request(&self, request: ChannelRequest) -> BastionResult<bool>;

    /// Sends extended data such as stderr to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::bastion::domain::BastionError::Transport`] when the
    /// channel is gone.
    async fn extended_data(&self, code: u32, data: Vec<u8>) -> BastionResult<()>;

    /// Closes the channel. Closing twice is a no-op.
    async fn close(&self);
}

/// One side of a channel as seen by the relay.
///
/// `stream` carries the channel's data in both directions: reading yields
/// what the peer sent, and shutting down the write half sends EOF. `closed`
/// fires once the peer has closed the channel or its connection dropped.
pub struct ChannelEndpoint {
    /// Channel data.
    pub stream: DuplexStream,
    /// Requests and extended data received from the peer.
    pub events: mpsc::Receiver<ChannelEvent>,
    /// Requests, extended data and close towards the peer.
    pub control: Arc<dyn ChannelControl>,
    /// Fires when the channel is closed.
    pub closed: CancellationToken,
}

impl std::fmt::Debug for ChannelEndpoint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ChannelEndpoint")
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}
