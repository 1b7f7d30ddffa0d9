//! Per-channel and per-connection forwarding between a client session and
//! its backend session.
//!
//! Each channel pair is served by three concurrent tasks: client requests to
//! the backend, backend requests to the client, and the byte stream in both
//! directions. The byte stream half-closes: when one direction reaches EOF,
//! EOF is sent to its destination and the other direction keeps draining.
//! Once both directions are done both channels are closed.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bastion::domain::{ChannelEvent, GlobalReply, GlobalRequest};
use crate::bastion::ports::{BackendSession, ChannelControl, ChannelEndpoint};

/// How long exit reports trailing the backend's EOF may take to arrive
/// before the client channel is closed anyway.
const EXIT_REPORT_GRACE: Duration = Duration::from_secs(5);

/// Relays one client channel to its backend twin until both are done.
///
/// I/O errors end only this channel. Errors meaning the peer is already gone
/// are expected during teardown and are not logged.
pub async fn relay_channel(client: ChannelEndpoint, backend: ChannelEndpoint, channel: String) {
    let ChannelEndpoint {
        stream: client_stream,
        events: client_events,
        control: client_control,
        closed: client_closed,
    } = client;
    let ChannelEndpoint {
        stream: backend_stream,
        events: backend_events,
        control: backend_control,
        closed: backend_closed,
    } = backend;

    let upstream_events = spawn_event_forwarder(
        client_events,
        Arc::clone(&backend_control),
        channel.clone(),
        "client->backend",
    );
    let mut downstream_events = spawn_event_forwarder(
        backend_events,
        Arc::clone(&client_control),
        channel.clone(),
        "backend->client",
    );

    if let Err(err) = pipe(client_stream, backend_stream, &client_closed, &backend_closed).await {
        if is_closed_error(&err) {
            debug!(channel = %channel, %err, "channel peer went away");
        } else {
            warn!(channel = %channel, %err, "channel relay I/O failed");
        }
    }

    if !client_closed.is_cancelled()
        && tokio::time::timeout(EXIT_REPORT_GRACE, &mut downstream_events)
            .await
            .is_err()
    {
        debug!(channel = %channel, "backend did not close after EOF");
    }

    backend_control.close().await;
    client_control.close().await;
    upstream_events.abort();
    downstream_events.abort();
    debug!(channel = %channel, "channel relay finished");
}

/// Forwards a connection-level request from the client to the backend.
///
/// A request that could not be delivered is reported to the client as a
/// refusal.
pub async fn forward_global_request(
    session: &dyn BackendSession,
    request: &GlobalRequest,
) -> GlobalReply {
    match session.global_request(request).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(?request, %err, "global request forwarding failed");
            GlobalReply::Refused
        }
    }
}

fn spawn_event_forwarder(
    events: mpsc::Receiver<ChannelEvent>,
    peer: Arc<dyn ChannelControl>,
    channel: String,
    direction: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(forward_events(events, peer, channel, direction))
}

async fn forward_events(
    mut events: mpsc::Receiver<ChannelEvent>,
    peer: Arc<dyn ChannelControl>,
    channel: String,
    direction: &'static str,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Request { request, reply } => {
                let request_type = request.request_type();
                let accepted = match peer.request(request).await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        debug!(channel = %channel, direction, request_type, %err, "request not delivered");
                        false
                    }
                };
                debug!(channel = %channel, direction, request_type, accepted, "relayed request");
                if let Some(reply) = reply {
                    if reply.send(accepted).is_err() {
                        debug!(channel = %channel, direction, request_type, "requester gone before reply");
                    }
                }
            }
            ChannelEvent::ExtendedData { code, data } => {
                if let Err(err) = peer.extended_data(code, data).await {
                    debug!(channel = %channel, direction, %err, "extended data not delivered");
                    return;
                }
            }
        }
    }
}

async fn pipe(
    client: DuplexStream,
    backend: DuplexStream,
    client_closed: &CancellationToken,
    backend_closed: &CancellationToken,
) -> io::Result<()> {
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let upstream = copy_then_eof(&mut client_read, &mut backend_write, backend_closed);
    let downstream = copy_then_eof(&mut backend_read, &mut client_write, client_closed);
    tokio::try_join!(upstream, downstream).map(|_| ())
}

/// Copies until `reader` reaches EOF, then sends EOF on `writer`.
///
/// Ends early without error when the destination channel closes, since an
/// idle source would otherwise keep the copy pending forever.
async fn copy_then_eof<R, W>(
    reader: &mut R,
    writer: &mut W,
    destination_closed: &CancellationToken,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        copied = async {
            let copied = tokio::io::copy(reader, writer).await?;
            writer.shutdown().await?;
            Ok::<_, io::Error>(copied)
        } => copied,
        () = destination_closed.cancelled() => Ok(0),
    }
}

fn is_closed_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
