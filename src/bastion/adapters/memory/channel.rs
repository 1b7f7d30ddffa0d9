//! In-memory channels whose far end is driven directly by the caller.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bastion::{
    domain::{BastionError, BastionResult, ChannelEvent, ChannelRequest},
    ports::{ChannelControl, ChannelEndpoint},
};

const BUFFER_BYTES: usize = 16 * 1024;
const EVENT_QUEUE: usize = 32;

/// Control half recording everything sent to the far end.
#[derive(Debug)]
pub struct RecordingControl {
    accept_requests: bool,
    requests: Mutex<Vec<ChannelRequest>>,
    extended: Mutex<Vec<(u32, Vec<u8>)>>,
    closed: CancellationToken,
}

impl RecordingControl {
    fn new(accept_requests: bool, closed: CancellationToken) -> Self {
        Self {
            accept_requests,
            requests: Mutex::new(Vec::new()),
            extended: Mutex::new(Vec::new()),
            closed,
        }
    }

    /// Returns the requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ChannelRequest> {
        guard(&self.requests).clone()
    }

    /// Returns the extended data received so far.
    #[must_use]
    pub fn extended_data(&self) -> Vec<(u32, Vec<u8>)> {
        guard(&self.extended).clone()
    }

    /// Returns whether the channel has been closed from either end.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Waits until the channel is closed.
    pub async fn wait_closed(&self) {
        self.closed.cancelled().await;
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ChannelControl for RecordingControl {
    async fn request(&self, request: ChannelRequest) -> BastionResult<bool> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let accepted = !request.wants_reply() || self.accept_requests;
        guard(&self.requests).push(request);
        Ok(accepted)
    }

    async fn extended_data(&self, code: u32, data: Vec<u8>) -> BastionResult<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        guard(&self.extended).push((code, data));
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

fn closed_error() -> BastionError {
    BastionError::transport(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
}

/// The far end of a [`loopback_channel`].
#[derive(Debug)]
pub struct ChannelPeer {
    /// Data as seen by the far end.
    pub stream: DuplexStream,
    /// Sends requests and extended data towards the endpoint's owner.
    pub events: mpsc::Sender<ChannelEvent>,
    /// What the endpoint's owner sent to the far end.
    pub control: Arc<RecordingControl>,
}

impl ChannelPeer {
    /// Closes the channel from the far end without sending EOF first.
    pub fn close(self) {
        self.control.closed.cancel();
    }
}

/// Creates a channel endpoint whose far end is returned as a
/// [`ChannelPeer`].
///
/// Requests wanting a reply are accepted when `accept_requests` is set.
#[must_use]
pub fn loopback_channel(accept_requests: bool) -> (ChannelEndpoint, ChannelPeer) {
    let (near, far) = tokio::io::duplex(BUFFER_BYTES);
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let closed = CancellationToken::new();
    let control = Arc::new(RecordingControl::new(accept_requests, closed.clone()));
    let endpoint = ChannelEndpoint {
        stream: near,
        events: events_rx,
        control: Arc::clone(&control) as Arc<dyn ChannelControl>,
        closed,
    };
    let peer = ChannelPeer {
        stream: far,
        events: events_tx,
        control,
    };
    (endpoint, peer)
}
