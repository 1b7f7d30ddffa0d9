//! Backend sessions over russh's client, one per bastion connection.

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::{Channel, ChannelId, ChannelMsg, ChannelOpenFailure, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use super::convert::{modes_from_wire, signal_from_name};
use crate::bastion::{
    domain::{
        BastionError, BastionResult, ChannelEvent, ChannelKind, ChannelRequest, GlobalReply,
        GlobalRequest, TcpipTarget,
    },
    ports::{
        BackendConnector, BackendLink, BackendSession, BackendTarget, ChannelControl,
        ChannelEndpoint, InboundChannel,
    },
};

const BUFFER_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 32 * 1024;
const EVENT_QUEUE: usize = 32;
const COMMAND_QUEUE: usize = 32;
const INBOUND_QUEUE: usize = 8;
const OPEN_FAILURE_QUEUE: usize = 8;
/// How long to wait for the node's refusal text once russh has reported a
/// failed open; the handler callback runs just after the opener is told.
const OPEN_FAILURE_DETAIL_WAIT: Duration = Duration::from_millis(500);

/// A `CHANNEL_OPEN_FAILURE` as the node sent it.
#[derive(Debug)]
struct OpenFailure {
    reason: ChannelOpenFailure,
    description: String,
}

/// Dials nodes and logs in with the gateway key.
#[derive(Clone)]
pub struct SshBackendConnector {
    config: Arc<client::Config>,
    key: Arc<KeyPair>,
}

impl std::fmt::Debug for SshBackendConnector {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("SshBackendConnector").finish_non_exhaustive()
    }
}

impl SshBackendConnector {
    /// Creates a connector authenticating with `key`.
    #[must_use]
    pub fn new(key: KeyPair) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            key: Arc::new(key),
        }
    }
}

#[async_trait]
impl BackendConnector for SshBackendConnector {
    async fn connect(&self, target: &BackendTarget) -> BastionResult<BackendLink> {
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (failures_tx, open_failures) = mpsc::channel(OPEN_FAILURE_QUEUE);
        let closed = CancellationToken::new();
        let handler = BackendHandler {
            host: target.host.clone(),
            inbound: inbound_tx,
            open_failures: failures_tx,
            _closed_on_drop: closed.clone().drop_guard(),
        };

        let mut handle = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            handler,
        )
        .await?;
        let authenticated = handle
            .authenticate_publickey(target.username.as_str(), Arc::clone(&self.key))
            .await?;
        if !authenticated {
            return Err(BastionError::transport(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("node refused the gateway key for {}", target.username),
            )));
        }

        debug!(host = %target.host, port = target.port, username = %target.username, "backend session established");
        Ok(BackendLink {
            session: Arc::new(SshBackendSession {
                handle: Mutex::new(handle),
                open_failures: Mutex::new(open_failures),
                closed,
            }),
            inbound,
        })
    }
}

struct BackendHandler {
    host: String,
    inbound: mpsc::Sender<InboundChannel>,
    open_failures: mpsc::Sender<OpenFailure>,
    _closed_on_drop: DropGuard,
}

#[async_trait]
impl client::Handler for BackendHandler {
    type Error = BastionError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        info!(host = %self.host, fingerprint = %server_public_key.fingerprint(), "accepting node host key");
        Ok(true)
    }

    async fn channel_open_failure(
        &mut self,
        _channel: ChannelId,
        reason: ChannelOpenFailure,
        description: &str,
        _language: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let failure = OpenFailure {
            reason,
            description: description.to_owned(),
        };
        if self.open_failures.try_send(failure).is_err() {
            debug!(host = %self.host, "channel refusal text dropped");
        }
        Ok(())
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let kind = ChannelKind::ForwardedTcpip(TcpipTarget {
            host: connected_address.to_owned(),
            port: connected_port,
            originator_address: originator_address.to_owned(),
            originator_port,
        });
        let endpoint = spawn_pump(channel);
        if self.inbound.send(InboundChannel { kind, endpoint }).await.is_err() {
            debug!(host = %self.host, "forwarded channel arrived after the client left");
        }
        Ok(())
    }
}

struct SshBackendSession {
    handle: Mutex<client::Handle<BackendHandler>>,
    /// Refusals reported by the handler. Held for a whole open so each
    /// refusal is matched with the open that caused it.
    open_failures: Mutex<mpsc::Receiver<OpenFailure>>,
    closed: CancellationToken,
}

/// Builds the rejection for a refused open, preferring the node's own words.
async fn refusal(
    failures: &mut mpsc::Receiver<OpenFailure>,
    reason: ChannelOpenFailure,
) -> BastionError {
    let described = tokio::time::timeout(OPEN_FAILURE_DETAIL_WAIT, failures.recv()).await;
    let (refused, message) = match described {
        Ok(Some(failure)) => (failure.reason, failure.description),
        Ok(None) | Err(_) => (reason, format!("{reason:?}")),
    };
    BastionError::ChannelRejected {
        reason_code: refused as u32,
        message,
    }
}

/// Forwarded-tcpip channels only ever flow from a node to the client.
fn forwarded_towards_node() -> BastionError {
    BastionError::ChannelRejected {
        reason_code: ChannelOpenFailure::AdministrativelyProhibited as u32,
        message: "bastion does not open forwarded-tcpip channels towards nodes".to_owned(),
    }
}

#[async_trait]
impl BackendSession for SshBackendSession {
    async fn open_channel(&self, kind: &ChannelKind) -> BastionResult<ChannelEndpoint> {
        let mut failures = self.open_failures.lock().await;
        while failures.try_recv().is_ok() {}
        let opened = {
            let handle = self.handle.lock().await;
            match kind {
                ChannelKind::Session => handle.channel_open_session().await,
                ChannelKind::DirectTcpip(target) => {
                    handle
                        .channel_open_direct_tcpip(
                            target.host.as_str(),
                            target.port,
                            target.originator_address.as_str(),
                            target.originator_port,
                        )
                        .await
                }
                ChannelKind::ForwardedTcpip(_) => return Err(forwarded_towards_node()),
            }
        };
        match opened {
            Ok(channel) => Ok(spawn_pump(channel)),
            Err(russh::Error::ChannelOpenFailure(reason)) => {
                Err(refusal(&mut failures, reason).await)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn global_request(&self, request: &GlobalRequest) -> BastionResult<GlobalReply> {
        let mut handle = self.handle.lock().await;
        let answered = match request {
            GlobalRequest::TcpipForward { address, port } => handle
                .tcpip_forward(address.as_str(), *port)
                .await
                .map(|bound| GlobalReply::Accepted {
                    bound_port: (bound != 0).then_some(bound),
                }),
            GlobalRequest::CancelTcpipForward { address, port } => handle
                .cancel_tcpip_forward(address.as_str(), *port)
                .await
                .map(|()| GlobalReply::Accepted { bound_port: None }),
        };
        match answered {
            Ok(reply) => Ok(reply),
            Err(russh::Error::RequestDenied) => Ok(GlobalReply::Refused),
            Err(err) => Err(err.into()),
        }
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        let handle = self.handle.lock().await;
        if let Err(err) = handle
            .disconnect(Disconnect::ByApplication, "client disconnected", "en")
            .await
        {
            debug!(%err, "backend disconnect failed");
        }
        self.closed.cancel();
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

enum PumpCommand {
    Request {
        request: ChannelRequest,
        reply: oneshot::Sender<bool>,
    },
    ExtendedData {
        code: u32,
        data: Vec<u8>,
    },
    Close,
}

/// Sends control operations to a channel's pump task.
struct PumpControl {
    commands: mpsc::Sender<PumpCommand>,
}

#[async_trait]
impl ChannelControl for PumpControl {
    async fn request(&self, request: ChannelRequest) -> BastionResult<bool> {
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(PumpCommand::Request { request, reply })
            .await
            .map_err(|_| pump_gone())?;
        Ok(verdict.await.unwrap_or(false))
    }

    async fn extended_data(&self, code: u32, data: Vec<u8>) -> BastionResult<()> {
        self.commands
            .send(PumpCommand::ExtendedData { code, data })
            .await
            .map_err(|_| pump_gone())
    }

    async fn close(&self) {
        if self.commands.send(PumpCommand::Close).await.is_err() {
            debug!("channel pump already stopped");
        }
    }
}

fn pump_gone() -> BastionError {
    BastionError::transport(io::Error::from(io::ErrorKind::BrokenPipe))
}

/// Wraps a russh channel in a [`ChannelEndpoint`] served by a pump task.
fn spawn_pump(channel: Channel<Msg>) -> ChannelEndpoint {
    let (near, far) = tokio::io::duplex(BUFFER_BYTES);
    let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
    let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
    let closed = CancellationToken::new();
    let (reader, writer) = tokio::io::split(far);

    tokio::spawn(
        Pump {
            channel,
            reader,
            writer,
            events: events_tx,
            commands,
            pending: VecDeque::new(),
            read_done: false,
            closing: false,
        }
        .run(closed.clone()),
    );

    ChannelEndpoint {
        stream: near,
        events,
        control: Arc::new(PumpControl {
            commands: commands_tx,
        }),
        closed,
    }
}

/// Moves bytes, requests and replies between a russh channel and the
/// relay's side of a duplex stream.
///
/// Request replies arrive in the order the requests were sent, so pending
/// reply slots are kept in a queue.
struct Pump {
    channel: Channel<Msg>,
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    events: mpsc::Sender<ChannelEvent>,
    commands: mpsc::Receiver<PumpCommand>,
    pending: VecDeque<oneshot::Sender<bool>>,
    read_done: bool,
    closing: bool,
}

impl Pump {
    async fn run(mut self, closed: CancellationToken) {
        let mut chunk = vec![0_u8; READ_CHUNK];
        loop {
            if self.closing && self.read_done {
                if let Err(err) = self.channel.close().await {
                    debug!(%err, "backend channel close failed");
                }
                break;
            }
            tokio::select! {
                next = self.channel.wait() => {
                    let Some(message) = next else { break };
                    if !self.on_channel_message(message).await {
                        break;
                    }
                }
                read = self.reader.read(&mut chunk), if !self.read_done => {
                    self.on_relay_read(read, &chunk).await;
                }
                command = self.commands.recv(), if !self.closing => {
                    self.on_command(command).await;
                }
            }
        }
        closed.cancel();
    }

    /// Returns `false` once the channel is finished.
    async fn on_channel_message(&mut self, message: ChannelMsg) -> bool {
        match message {
            ChannelMsg::Data { data } => {
                if let Err(err) = self.writer.write_all(&data).await {
                    debug!(%err, "relay stopped reading backend data");
                }
            }
            ChannelMsg::ExtendedData { data, ext } => {
                self.emit(ChannelEvent::ExtendedData {
                    code: ext,
                    data: data.to_vec(),
                })
                .await;
            }
            ChannelMsg::Eof => {
                if let Err(err) = self.writer.shutdown().await {
                    debug!(%err, "relay gone before backend EOF");
                }
            }
            ChannelMsg::Close => return false,
            ChannelMsg::ExitStatus { exit_status } => {
                self.emit_request(ChannelRequest::ExitStatus(exit_status)).await;
            }
            ChannelMsg::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                lang_tag,
            } => {
                self.emit_request(ChannelRequest::ExitSignal {
                    signal: super::convert::signal_name(&signal_name),
                    core_dumped,
                    message: error_message,
                    lang_tag,
                })
                .await;
            }
            ChannelMsg::Success => self.resolve(true),
            ChannelMsg::Failure => self.resolve(false),
            _ => {}
        }
        true
    }

    async fn on_relay_read(&mut self, read: io::Result<usize>, chunk: &[u8]) {
        match read {
            Ok(0) => {
                self.read_done = true;
                if let Err(err) = self.channel.eof().await {
                    debug!(%err, "backend channel EOF failed");
                }
            }
            Ok(count) => {
                let Some(bytes) = chunk.get(..count) else {
                    return;
                };
                if let Err(err) = self.channel.data(bytes).await {
                    debug!(%err, "backend channel write failed");
                    self.read_done = true;
                }
            }
            Err(err) => {
                debug!(%err, "relay stream failed");
                self.read_done = true;
            }
        }
    }

    async fn on_command(&mut self, command: Option<PumpCommand>) {
        match command {
            Some(PumpCommand::Request { request, reply }) => {
                let wants_reply = request.wants_reply();
                match self.send_request(request).await {
                    Ok(()) if wants_reply => self.pending.push_back(reply),
                    Ok(()) => {
                        if reply.send(true).is_err() {
                            debug!("requester gone before reply");
                        }
                    }
                    Err(err) => {
                        debug!(%err, "backend channel request failed");
                        if reply.send(false).is_err() {
                            debug!("requester gone before reply");
                        }
                    }
                }
            }
            Some(PumpCommand::ExtendedData { code, data }) => {
                if let Err(err) = self.channel.extended_data(code, data.as_slice()).await {
                    debug!(%err, "backend extended data failed");
                }
            }
            Some(PumpCommand::Close) | None => self.closing = true,
        }
    }

    async fn send_request(&mut self, request: ChannelRequest) -> Result<(), russh::Error> {
        let want_reply = request.wants_reply();
        match request {
            ChannelRequest::Pty(pty) => {
                self.channel
                    .request_pty(
                        want_reply,
                        &pty.term,
                        pty.col_width,
                        pty.row_height,
                        pty.pix_width,
                        pty.pix_height,
                        &modes_from_wire(&pty.modes),
                    )
                    .await
            }
            ChannelRequest::Shell => self.channel.request_shell(want_reply).await,
            ChannelRequest::Exec(command) => self.channel.exec(want_reply, command).await,
            ChannelRequest::Env { name, value } => {
                self.channel.set_env(want_reply, name, value).await
            }
            ChannelRequest::Subsystem(name) => {
                self.channel.request_subsystem(want_reply, name).await
            }
            ChannelRequest::WindowChange(size) => {
                self.channel
                    .window_change(
                        size.col_width,
                        size.row_height,
                        size.pix_width,
                        size.pix_height,
                    )
                    .await
            }
            ChannelRequest::Signal(name) => self.channel.signal(signal_from_name(&name)).await,
            ChannelRequest::AgentForward => self.channel.agent_forward(want_reply).await,
            ChannelRequest::ExitStatus(_) | ChannelRequest::ExitSignal { .. } => {
                debug!("exit reports are not sent towards nodes");
                Ok(())
            }
        }
    }

    async fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).await.is_err() {
            debug!("relay stopped listening to backend events");
        }
    }

    async fn emit_request(&self, request: ChannelRequest) {
        self.emit(ChannelEvent::Request {
            request,
            reply: None,
        })
        .await;
    }

    fn resolve(&mut self, accepted: bool) {
        match self.pending.pop_front() {
            Some(reply) => {
                if reply.send(accepted).is_err() {
                    debug!("requester gone before reply");
                }
            }
            None => debug!(accepted, "unsolicited channel reply"),
        }
    }
}
