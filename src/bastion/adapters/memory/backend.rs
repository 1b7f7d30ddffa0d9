//! In-memory backend connector whose sessions hand out loopback channels.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelPeer, loopback_channel};
use crate::bastion::{
    domain::{BastionError, BastionResult, ChannelKind, GlobalReply, GlobalRequest},
    ports::{
        BackendConnector, BackendLink, BackendSession, BackendTarget, ChannelEndpoint,
        InboundChannel,
    },
};

const INBOUND_QUEUE: usize = 8;

/// Port handed out for every `tcpip-forward` asking the backend to choose.
pub const CHOSEN_FORWARD_PORT: u32 = 40_000;

/// How the in-memory connector answers dials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DialBehaviour {
    /// Dials succeed.
    #[default]
    Accept,
    /// Dials fail with this message.
    Refuse(String),
    /// Dials never complete.
    Hang,
}

/// Backend connector recording every dial.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackendConnector {
    state: Arc<Mutex<ConnectorState>>,
}

#[derive(Debug, Default)]
struct ConnectorState {
    behaviour: DialBehaviour,
    dials: Vec<BackendTarget>,
    sessions: Vec<Arc<InMemoryBackendSession>>,
}

impl InMemoryBackendConnector {
    /// Creates a connector that accepts every dial.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes how following dials are answered.
    pub fn set_behaviour(&self, behaviour: DialBehaviour) {
        self.lock().behaviour = behaviour;
    }

    /// Returns every dial attempted so far.
    #[must_use]
    pub fn dials(&self) -> Vec<BackendTarget> {
        self.lock().dials.clone()
    }

    /// Returns the sessions established so far.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<InMemoryBackendSession>> {
        self.lock().sessions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BackendConnector for InMemoryBackendConnector {
    async fn connect(&self, target: &BackendTarget) -> BastionResult<BackendLink> {
        let behaviour = {
            let mut state = self.lock();
            state.dials.push(target.clone());
            state.behaviour.clone()
        };
        match behaviour {
            DialBehaviour::Accept => {}
            DialBehaviour::Refuse(message) => {
                return Err(BastionError::transport(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    message,
                )));
            }
            DialBehaviour::Hang => std::future::pending::<()>().await,
        }

        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let session = Arc::new(InMemoryBackendSession::new(target.clone(), inbound_tx));
        self.lock().sessions.push(Arc::clone(&session));
        Ok(BackendLink {
            session,
            inbound,
        })
    }
}

/// Backend session whose channels are loopbacks driven by the caller.
#[derive(Debug)]
pub struct InMemoryBackendSession {
    target: BackendTarget,
    channels: Mutex<Vec<(ChannelKind, ChannelPeer)>>,
    global_requests: Mutex<Vec<GlobalRequest>>,
    rejection: Mutex<Option<(u32, String)>>,
    inbound: mpsc::Sender<InboundChannel>,
    closed: CancellationToken,
}

impl InMemoryBackendSession {
    fn new(target: BackendTarget, inbound: mpsc::Sender<InboundChannel>) -> Self {
        Self {
            target,
            channels: Mutex::new(Vec::new()),
            global_requests: Mutex::new(Vec::new()),
            rejection: Mutex::new(None),
            inbound,
            closed: CancellationToken::new(),
        }
    }

    /// Returns the target this session was dialled for.
    #[must_use]
    pub const fn target(&self) -> &BackendTarget {
        &self.target
    }

    /// Makes following channel opens fail with `reason_code` and `message`.
    pub fn reject_channels(&self, reason_code: u32, message: impl Into<String>) {
        *guard(&self.rejection) = Some((reason_code, message.into()));
    }

    /// Removes and returns the far ends of the channels opened so far.
    pub fn take_channels(&self) -> Vec<(ChannelKind, ChannelPeer)> {
        std::mem::take(&mut *guard(&self.channels))
    }

    /// Returns the global requests forwarded so far.
    #[must_use]
    pub fn global_requests(&self) -> Vec<GlobalRequest> {
        guard(&self.global_requests).clone()
    }

    /// Opens a channel from the backend side, such as `forwarded-tcpip`.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Transport`] when the gateway stopped
    /// accepting inbound channels.
    pub async fn open_inbound(&self, kind: ChannelKind) -> BastionResult<ChannelPeer> {
        let (endpoint, peer) = loopback_channel(true);
        self.inbound
            .send(InboundChannel { kind, endpoint })
            .await
            .map_err(|err| {
                BastionError::transport(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    err.to_string(),
                ))
            })?;
        Ok(peer)
    }

    /// Ends the session from the backend side.
    pub fn drop_connection(&self) {
        self.closed.cancel();
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl BackendSession for InMemoryBackendSession {
    async fn open_channel(&self, kind: &ChannelKind) -> BastionResult<ChannelEndpoint> {
        if let Some((reason_code, message)) = guard(&self.rejection).clone() {
            return Err(BastionError::ChannelRejected {
                reason_code,
                message,
            });
        }
        let (endpoint, peer) = loopback_channel(true);
        guard(&self.channels).push((kind.clone(), peer));
        Ok(endpoint)
    }

    async fn global_request(&self, request: &GlobalRequest) -> BastionResult<GlobalReply> {
        guard(&self.global_requests).push(request.clone());
        let bound_port = match request {
            GlobalRequest::TcpipForward { port: 0, .. } => Some(CHOSEN_FORWARD_PORT),
            GlobalRequest::TcpipForward { .. } | GlobalRequest::CancelTcpipForward { .. } => None,
        };
        Ok(GlobalReply::Accepted { bound_port })
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}
