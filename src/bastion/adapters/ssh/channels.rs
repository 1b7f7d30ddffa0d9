//! Client-side channels of one bastion connection, bridged onto
//! [`ChannelEndpoint`]s.
//!
//! russh delivers client data and requests through handler callbacks keyed
//! by channel id, so each open channel has a slot here that the callbacks
//! feed. Data heading to the client leaves through the session handle.

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::convert::signal_from_name;
use crate::bastion::{
    domain::{BastionError, BastionResult, ChannelEvent, ChannelRequest},
    ports::{ChannelControl, ChannelEndpoint},
};

const BUFFER_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 32 * 1024;
const DATA_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 32;
const FLUSH_GRACE: Duration = Duration::from_secs(5);

/// Data received from the client for one channel.
#[derive(Debug)]
pub(super) enum Inbound {
    Data(Vec<u8>),
    Eof,
}

#[derive(Debug, Clone)]
struct Slot {
    inbound: mpsc::Sender<Inbound>,
    events: mpsc::Sender<ChannelEvent>,
    closed: CancellationToken,
}

/// Open client channels of one connection.
#[derive(Debug, Clone)]
pub(super) struct ClientChannels {
    slots: Arc<Mutex<HashMap<ChannelId, Slot>>>,
    connection: CancellationToken,
}

impl ClientChannels {
    pub(super) fn new(connection: CancellationToken) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            connection,
        }
    }

    /// Registers channel `id` and returns its relay endpoint.
    pub(super) fn attach(&self, id: ChannelId, handle: Handle) -> ChannelEndpoint {
        let (near, far) = tokio::io::duplex(BUFFER_BYTES);
        let (far_read, far_write) = tokio::io::split(far);
        let (inbound_tx, inbound_rx) = mpsc::channel(DATA_QUEUE);
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        let closed = self.connection.child_token();
        let flushed = CancellationToken::new();

        self.lock().insert(
            id,
            Slot {
                inbound: inbound_tx,
                events: events_tx,
                closed: closed.clone(),
            },
        );
        tokio::spawn(write_inbound(inbound_rx, far_write));
        tokio::spawn(send_outbound(
            far_read,
            handle.clone(),
            id,
            closed.clone(),
            flushed.clone(),
        ));

        ChannelEndpoint {
            stream: near,
            events,
            control: Arc::new(ClientChannelControl {
                handle,
                id,
                channels: self.clone(),
                closed: closed.clone(),
                flushed,
            }),
            closed,
        }
    }

    /// Queues client data or EOF for channel `id`.
    pub(super) async fn deliver(&self, id: ChannelId, inbound: Inbound) {
        let Some(sender) = self.slot(id).map(|slot| slot.inbound) else {
            debug!(channel = ?id, "data for a channel that is not relayed");
            return;
        };
        if sender.send(inbound).await.is_err() {
            debug!(channel = ?id, "relay stopped reading client data");
        }
    }

    /// Queues a request or extended data from the client for channel `id`.
    ///
    /// Returns the event back when the channel is not relayed.
    pub(super) async fn emit(&self, id: ChannelId, event: ChannelEvent) -> Option<ChannelEvent> {
        let Some(sender) = self.slot(id).map(|slot| slot.events) else {
            return Some(event);
        };
        if sender.send(event).await.is_err() {
            debug!(channel = ?id, "relay stopped reading client requests");
        }
        None
    }

    /// Forgets channel `id` and marks it closed.
    pub(super) fn remove(&self, id: ChannelId) {
        if let Some(slot) = self.lock().remove(&id) {
            slot.closed.cancel();
        }
    }

    fn slot(&self, id: ChannelId) -> Option<Slot> {
        self.lock().get(&id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Writes client data into the relay's side of the channel.
async fn write_inbound(mut inbound: mpsc::Receiver<Inbound>, mut writer: WriteHalf<DuplexStream>) {
    while let Some(next) = inbound.recv().await {
        match next {
            Inbound::Data(data) => {
                if let Err(err) = writer.write_all(&data).await {
                    debug!(%err, "relay gone before client data");
                    return;
                }
            }
            Inbound::Eof => break,
        }
    }
    if let Err(err) = writer.shutdown().await {
        debug!(%err, "relay gone before client EOF");
    }
}

/// Sends what the relay writes to the client, followed by EOF.
async fn send_outbound(
    mut reader: ReadHalf<DuplexStream>,
    handle: Handle,
    id: ChannelId,
    closed: CancellationToken,
    flushed: CancellationToken,
) {
    let mut chunk = vec![0_u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                if !closed.is_cancelled() && handle.eof(id).await.is_err() {
                    debug!(channel = ?id, "client channel gone before EOF");
                }
                break;
            }
            Ok(count) => {
                let Some(bytes) = chunk.get(..count) else {
                    break;
                };
                if handle.data(id, CryptoVec::from_slice(bytes)).await.is_err() {
                    debug!(channel = ?id, "client channel gone before data");
                    break;
                }
            }
            Err(err) => {
                debug!(channel = ?id, %err, "relay stream failed");
                break;
            }
        }
    }
    flushed.cancel();
}

/// Control half of a client channel, driven through the session handle.
struct ClientChannelControl {
    handle: Handle,
    id: ChannelId,
    channels: ClientChannels,
    closed: CancellationToken,
    flushed: CancellationToken,
}

fn channel_gone() -> BastionError {
    BastionError::transport(io::Error::from(io::ErrorKind::BrokenPipe))
}

#[async_trait]
impl ChannelControl for ClientChannelControl {
    async fn request(&self, request: ChannelRequest) -> BastionResult<bool> {
        match request {
            ChannelRequest::ExitStatus(code) => {
                self.handle
                    .exit_status_request(self.id, code)
                    .await
                    .map_err(|_| channel_gone())?;
                Ok(true)
            }
            ChannelRequest::ExitSignal {
                signal,
                core_dumped,
                message,
                lang_tag,
            } => {
                self.handle
                    .exit_signal_request(
                        self.id,
                        signal_from_name(&signal),
                        core_dumped,
                        message,
                        lang_tag,
                    )
                    .await
                    .map_err(|_| channel_gone())?;
                Ok(true)
            }
            other => {
                debug!(channel = ?self.id, request_type = other.request_type(), "request not sent towards clients");
                Ok(false)
            }
        }
    }

    async fn extended_data(&self, code: u32, data: Vec<u8>) -> BastionResult<()> {
        self.handle
            .extended_data(self.id, code, CryptoVec::from_slice(&data))
            .await
            .map_err(|_| channel_gone())
    }

    async fn close(&self) {
        if tokio::time::timeout(FLUSH_GRACE, self.flushed.cancelled())
            .await
            .is_err()
        {
            debug!(channel = ?self.id, "client data not flushed before close");
        }
        if !self.closed.is_cancelled() && self.handle.close(self.id).await.is_err() {
            debug!(channel = ?self.id, "client channel already gone");
        }
        self.channels.remove(self.id);
        self.closed.cancel();
    }
}
