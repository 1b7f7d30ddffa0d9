//! SSH listener for user connections, built on russh's server.
//!
//! Each accepted connection gets its own handler. Authentication resolves
//! the user's container; right after it succeeds the connection is either
//! put in banner mode or bound to a freshly dialled backend session, and
//! every channel and global request from then on follows that decision.

use async_trait::async_trait;
use russh::server::{self, Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Disconnect, MethodSet, Pty, Sig};
use russh_keys::PublicKeyBase64;
use russh_keys::key::PublicKey;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::HostKey;
use super::channels::{ClientChannels, Inbound};
use super::convert::{modes_to_wire, signal_name};
use crate::bastion::{
    domain::{
        BastionError, BastionResult, ChannelEvent, ChannelKind, ChannelRequest,
        ConnectionContext, GlobalReply, GlobalRequest, OfferedCredential, PtyRequest, TcpipTarget,
        WindowSize,
    },
    ports::{BackendConnector, BackendLink, BackendSession, InboundChannel, UserDirectory},
    services::{Authenticator, SessionBroker, SessionPlan, forward_global_request, relay_channel},
};
use crate::fleet::ports::FleetRepository;

const AUTH_REJECTION_DELAY: Duration = Duration::from_secs(1);

/// The bastion's SSH front door.
pub struct SshGateway<D, R, B>
where
    D: UserDirectory,
    R: FleetRepository,
    B: BackendConnector,
{
    authenticator: Authenticator<D, R>,
    broker: SessionBroker<B>,
    config: Arc<server::Config>,
}

impl<D, R, B> SshGateway<D, R, B>
where
    D: UserDirectory + 'static,
    R: FleetRepository + 'static,
    B: BackendConnector + 'static,
{
    /// Creates a gateway presenting `host_key` to clients.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Transport`] when the host key cannot be
    /// decoded.
    pub fn new(
        authenticator: Authenticator<D, R>,
        broker: SessionBroker<B>,
        host_key: &HostKey,
    ) -> BastionResult<Self> {
        let config = server::Config {
            methods: MethodSet::PUBLICKEY | MethodSet::PASSWORD,
            keys: vec![host_key.key_pair()?],
            auth_rejection_time: AUTH_REJECTION_DELAY,
            ..server::Config::default()
        };
        Ok(Self {
            authenticator,
            broker,
            config: Arc::new(config),
        })
    }

    /// Accepts connections on `listener` until `shutdown` fires.
    ///
    /// Cancelling `shutdown` also tears down every relayed connection.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            let (stream, peer) = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "failed to accept ssh connection");
                        continue;
                    }
                },
            };
            if let Err(err) = stream.set_nodelay(true) {
                debug!(%peer, %err, "could not disable nagle");
            }

            let handler = ConnectionHandler::new(
                self.authenticator.clone(),
                self.broker.clone(),
                peer,
                shutdown.child_token(),
            );
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                debug!(%peer, "ssh connection accepted");
                match server::run_stream(config, stream, handler).await {
                    Ok(session) => {
                        if let Err(err) = session.await {
                            debug!(%peer, %err, "ssh connection ended with error");
                        }
                    }
                    Err(err) => debug!(%peer, %err, "ssh handshake failed"),
                }
            });
        }
        info!("ssh gateway stopped accepting connections");
    }
}

enum ConnectionState {
    Unauthenticated,
    Banner(String),
    Relaying(Arc<dyn BackendSession>),
}

struct ConnectionHandler<D, R, B>
where
    D: UserDirectory,
    R: FleetRepository,
    B: BackendConnector,
{
    authenticator: Authenticator<D, R>,
    broker: SessionBroker<B>,
    peer: SocketAddr,
    context: Option<ConnectionContext>,
    state: ConnectionState,
    channels: ClientChannels,
    connection: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl<D, R, B> ConnectionHandler<D, R, B>
where
    D: UserDirectory + 'static,
    R: FleetRepository + 'static,
    B: BackendConnector + 'static,
{
    fn new(
        authenticator: Authenticator<D, R>,
        broker: SessionBroker<B>,
        peer: SocketAddr,
        connection: CancellationToken,
    ) -> Self {
        Self {
            authenticator,
            broker,
            peer,
            context: None,
            state: ConnectionState::Unauthenticated,
            channels: ClientChannels::new(connection.clone()),
            _cancel_on_drop: connection.clone().drop_guard(),
            connection,
        }
    }

    async fn check_credential(&mut self, username: &str, offered: OfferedCredential) -> Auth {
        let method = offered.method();
        match self.authenticator.authenticate(username, offered).await {
            Ok(context) => {
                info!(peer = %self.peer, username, method, "ssh login accepted");
                self.context = Some(context);
                Auth::Accept
            }
            Err(err) => {
                if err.is_credential_failure() {
                    info!(peer = %self.peer, username, method, %err, "ssh login rejected");
                } else {
                    warn!(peer = %self.peer, username, method, %err, "ssh login could not be checked");
                }
                Auth::Reject {
                    proceed_with_methods: None,
                }
            }
        }
    }

    fn label(&self, id: ChannelId) -> String {
        format!("{}/{id:?}", self.peer)
    }

    fn backend(&self) -> Option<Arc<dyn BackendSession>> {
        match &self.state {
            ConnectionState::Relaying(backend) => Some(Arc::clone(backend)),
            ConnectionState::Unauthenticated | ConnectionState::Banner(_) => None,
        }
    }

    fn start_relaying(&mut self, link: BackendLink, handle: Handle) {
        let BackendLink {
            session: backend,
            inbound,
        } = link;
        self.state = ConnectionState::Relaying(Arc::clone(&backend));
        tokio::spawn(accept_inbound(
            inbound,
            handle.clone(),
            self.channels.clone(),
            self.connection.clone(),
            self.peer,
        ));
        tokio::spawn(watch_teardown(
            backend,
            handle,
            self.connection.clone(),
            self.peer,
        ));
    }

    /// Opens the backend twin of a client channel and starts relaying.
    ///
    /// Returns whether the client channel is accepted. russh answers every
    /// refused open with `administratively prohibited`, so the node's own
    /// reason is only logged.
    async fn open_relayed(&self, kind: &ChannelKind, channel: Channel<Msg>, handle: Handle) -> bool {
        let id = channel.id();
        let Some(backend) = self.backend() else {
            debug!(peer = %self.peer, channel_type = kind.type_name(), "channel refused outside relay mode");
            return false;
        };
        match backend.open_channel(kind).await {
            Ok(backend_endpoint) => {
                let client_endpoint = self.channels.attach(id, handle);
                drain(channel);
                tokio::spawn(relay_channel(client_endpoint, backend_endpoint, self.label(id)));
                debug!(peer = %self.peer, channel = ?id, channel_type = kind.type_name(), "channel relayed");
                true
            }
            Err(BastionError::ChannelRejected {
                reason_code,
                message,
            }) => {
                info!(
                    peer = %self.peer,
                    channel_type = kind.type_name(),
                    reason_code,
                    reason = %message,
                    "node refused channel"
                );
                false
            }
            Err(err) => {
                warn!(peer = %self.peer, channel_type = kind.type_name(), %err, "backend channel open failed");
                false
            }
        }
    }

    /// Hands a client channel request to the relay, replying through the
    /// session handle once the backend has answered.
    async fn relay_request(&self, id: ChannelId, request: ChannelRequest, handle: Handle) {
        let request_type = request.request_type();
        let reply = request.wants_reply().then(|| {
            let (reply, verdict) = oneshot::channel();
            tokio::spawn(answer_request(verdict, handle, id));
            reply
        });
        if self
            .channels
            .emit(id, ChannelEvent::Request { request, reply })
            .await
            .is_some()
        {
            debug!(peer = %self.peer, channel = ?id, request_type, "request on a channel that is not relayed");
        }
    }

    async fn relay_global(&self, request: &GlobalRequest) -> GlobalReply {
        match self.backend() {
            Some(backend) => forward_global_request(backend.as_ref(), request).await,
            None => {
                debug!(peer = %self.peer, ?request, "global request refused outside relay mode");
                GlobalReply::Refused
            }
        }
    }
}

#[async_trait]
impl<D, R, B> server::Handler for ConnectionHandler<D, R, B>
where
    D: UserDirectory + 'static,
    R: FleetRepository + 'static,
    B: BackendConnector + 'static,
{
    type Error = BastionError;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let offered = OfferedCredential::PublicKey(public_key.public_key_bytes());
        Ok(self.check_credential(user, offered).await)
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let offered = OfferedCredential::Password(password.to_owned());
        Ok(self.check_credential(user, offered).await)
    }

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        let Some(context) = self.context.clone() else {
            return Ok(());
        };
        match self.broker.open(&context).await {
            Ok(SessionPlan::Banner(banner)) => {
                self.state = ConnectionState::Banner(banner);
                Ok(())
            }
            Ok(SessionPlan::Relay(link)) => {
                info!(peer = %self.peer, username = %context.username, "relaying to backend");
                self.start_relaying(link, session.handle());
                Ok(())
            }
            Err(err) => {
                warn!(peer = %self.peer, username = %context.username, %err, "closing connection");
                Err(err)
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if let ConnectionState::Banner(banner) = &self.state {
            let id = channel.id();
            drain(channel);
            tokio::spawn(write_banner(session.handle(), id, banner.clone()));
            return Ok(true);
        }
        Ok(self
            .open_relayed(&ChannelKind::Session, channel, session.handle())
            .await)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let kind = ChannelKind::DirectTcpip(TcpipTarget {
            host: host_to_connect.to_owned(),
            port: port_to_connect,
            originator_address: originator_address.to_owned(),
            originator_port,
        });
        Ok(self.open_relayed(&kind, channel, session.handle()).await)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.deliver(channel, Inbound::Data(data.to_vec())).await;
        Ok(())
    }

    async fn extended_data(
        &mut self,
        channel: ChannelId,
        code: u32,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let event = ChannelEvent::ExtendedData {
            code,
            data: data.to_vec(),
        };
        if self.channels.emit(channel, event).await.is_some() {
            debug!(peer = %self.peer, ?channel, "extended data on a channel that is not relayed");
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.deliver(channel, Inbound::Eof).await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(channel);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Pty(PtyRequest {
            term: term.to_owned(),
            col_width,
            row_height,
            pix_width,
            pix_height,
            modes: modes_to_wire(modes),
        });
        self.relay_request(channel, request, session.handle()).await;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.relay_request(channel, ChannelRequest::Shell, session.handle())
            .await;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.relay_request(channel, ChannelRequest::Exec(data.to_vec()), session.handle())
            .await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Env {
            name: variable_name.to_owned(),
            value: variable_value.to_owned(),
        };
        self.relay_request(channel, request, session.handle()).await;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.relay_request(
            channel,
            ChannelRequest::Subsystem(name.to_owned()),
            session.handle(),
        )
        .await;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::WindowChange(WindowSize {
            col_width,
            row_height,
            pix_width,
            pix_height,
        });
        self.relay_request(channel, request, session.handle()).await;
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Signal(signal_name(&signal));
        self.relay_request(channel, request, session.handle()).await;
        Ok(())
    }

    async fn agent_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.backend().is_none() {
            return Ok(false);
        }
        self.relay_request(channel, ChannelRequest::AgentForward, session.handle())
            .await;
        Ok(true)
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let request = GlobalRequest::TcpipForward {
            address: address.to_owned(),
            port: *port,
        };
        match self.relay_global(&request).await {
            GlobalReply::Accepted { bound_port } => {
                if let Some(bound) = bound_port {
                    *port = bound;
                }
                Ok(true)
            }
            GlobalReply::Refused => Ok(false),
        }
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let request = GlobalRequest::CancelTcpipForward {
            address: address.to_owned(),
            port,
        };
        Ok(self.relay_global(&request).await.is_accepted())
    }
}

/// Keeps russh's per-channel queue moving; data is taken from the handler
/// callbacks instead.
fn drain(mut channel: Channel<Msg>) {
    tokio::spawn(async move { while channel.wait().await.is_some() {} });
}

async fn answer_request(verdict: oneshot::Receiver<bool>, handle: Handle, id: ChannelId) {
    let accepted = verdict.await.unwrap_or(false);
    let sent = if accepted {
        handle.channel_success(id).await
    } else {
        handle.channel_failure(id).await
    };
    if sent.is_err() {
        debug!(channel = ?id, accepted, "client channel gone before reply");
    }
}

async fn write_banner(handle: Handle, id: ChannelId, banner: String) {
    if handle
        .data(id, CryptoVec::from_slice(banner.as_bytes()))
        .await
        .is_err()
    {
        debug!(channel = ?id, "client left before the banner");
        return;
    }
    if handle.eof(id).await.is_err() || handle.close(id).await.is_err() {
        debug!(channel = ?id, "client left while closing banner channel");
    }
}

/// Opens a client channel for each channel the backend opens, such as
/// connections arriving on a remote forward.
async fn accept_inbound(
    mut inbound: mpsc::Receiver<InboundChannel>,
    handle: Handle,
    channels: ClientChannels,
    connection: CancellationToken,
    peer: SocketAddr,
) {
    loop {
        let InboundChannel { kind, endpoint } = tokio::select! {
            () = connection.cancelled() => break,
            next = inbound.recv() => match next {
                Some(channel) => channel,
                None => break,
            },
        };
        let ChannelKind::ForwardedTcpip(target) = &kind else {
            debug!(%peer, channel_type = kind.type_name(), "backend channel type not relayed");
            endpoint.control.close().await;
            continue;
        };
        let opened = handle
            .channel_open_forwarded_tcpip(
                target.host.clone(),
                target.port,
                target.originator_address.clone(),
                target.originator_port,
            )
            .await;
        match opened {
            Ok(channel) => {
                let id = channel.id();
                let client_endpoint = channels.attach(id, handle.clone());
                drain(channel);
                tokio::spawn(relay_channel(client_endpoint, endpoint, format!("{peer}/{id:?}")));
            }
            Err(err) => {
                debug!(%peer, %err, "client refused forwarded channel");
                endpoint.control.close().await;
            }
        }
    }
}

/// Ends the client connection when the backend session ends and the other
/// way round.
async fn watch_teardown(
    backend: Arc<dyn BackendSession>,
    handle: Handle,
    connection: CancellationToken,
    peer: SocketAddr,
) {
    let backend_closed = backend.closed();
    tokio::select! {
        () = connection.cancelled() => debug!(%peer, "client connection ended"),
        () = backend_closed.cancelled() => info!(%peer, "backend session ended"),
    }
    connection.cancel();
    backend.close().await;
    if handle
        .disconnect(
            Disconnect::ByApplication,
            "session ended".to_owned(),
            "en".to_owned(),
        )
        .await
        .is_err()
    {
        debug!(%peer, "client already disconnected");
    }
}
