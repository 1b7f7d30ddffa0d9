//! Channel types, channel requests and global requests as relayed between
//! the client and backend SSH sessions.

use tokio::sync::oneshot;

/// Endpoint description carried by `direct-tcpip` and `forwarded-tcpip`
/// channel-open messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpipTarget {
    /// Host to connect to, or the address that was connected.
    pub host: String,
    /// Port to connect to, or the port that was connected.
    pub port: u32,
    /// Address of the connection originator.
    pub originator_address: String,
    /// Port of the connection originator.
    pub originator_port: u32,
}

/// SSH channel type together with its channel-open payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Interactive or exec session.
    Session,
    /// Client-initiated TCP forwarding.
    DirectTcpip(TcpipTarget),
    /// Server-initiated TCP forwarding for a `tcpip-forward` listener.
    ForwardedTcpip(TcpipTarget),
}

impl ChannelKind {
    /// Returns the SSH channel type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::DirectTcpip(_) => "direct-tcpip",
            Self::ForwardedTcpip(_) => "forwarded-tcpip",
        }
    }
}

/// Pseudo-terminal allocation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// `TERM` value.
    pub term: String,
    /// Width in characters.
    pub col_width: u32,
    /// Height in rows.
    pub row_height: u32,
    /// Width in pixels.
    pub pix_width: u32,
    /// Height in pixels.
    pub pix_height: u32,
    /// Encoded terminal modes as `(opcode, value)` pairs.
    pub modes: Vec<(u8, u32)>,
}

/// Terminal resize notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    /// Width in characters.
    pub col_width: u32,
    /// Height in rows.
    pub row_height: u32,
    /// Width in pixels.
    pub pix_width: u32,
    /// Height in pixels.
    pub pix_height: u32,
}

/// Channel-scoped request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    /// `pty-req`.
    Pty(PtyRequest),
    /// `shell`.
    Shell,
    /// `exec` with the raw command bytes.
    Exec(Vec<u8>),
    /// `env`.
    Env {
        /// Variable name.
        name: String,
        /// Variable value.
        value: String,
    },
    /// `subsystem`.
    Subsystem(String),
    /// `window-change`.
    WindowChange(WindowSize),
    /// `signal` with the signal name without the `SIG` prefix.
    Signal(String),
    /// `auth-agent-req@openssh.com`.
    AgentForward,
    /// `exit-status`.
    ExitStatus(u32),
    /// `exit-signal`.
    ExitSignal {
        /// Signal name without the `SIG` prefix.
        signal: String,
        /// Whether a core was dumped.
        core_dumped: bool,
        /// Error text.
        message: String,
        /// Language tag of `message`.
        lang_tag: String,
    },
}

impl ChannelRequest {
    /// Returns the SSH request type name.
    #[must_use]
    pub const fn request_type(&self) -> &'static str {
        match self {
            Self::Pty(_) => "pty-req",
            Self::Shell => "shell",
            Self::Exec(_) => "exec",
            Self::Env { .. } => "env",
            Self::Subsystem(_) => "subsystem",
            Self::WindowChange(_) => "window-change",
            Self::Signal(_) => "signal",
            Self::AgentForward => "auth-agent-req@openssh.com",
            Self::ExitStatus(_) => "exit-status",
            Self::ExitSignal { .. } => "exit-signal",
        }
    }

    /// Returns whether the sender expects a success or failure reply.
    ///
    /// Follows what OpenSSH clients send: notifications, agent forwarding
    /// and exit reports never ask for one.
    #[must_use]
    pub const fn wants_reply(&self) -> bool {
        matches!(
            self,
            Self::Pty(_) | Self::Shell | Self::Exec(_) | Self::Subsystem(_)
        )
    }
}

/// Something a channel endpoint received that is not plain data.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A channel request; `reply` is present when the sender wants one.
    Request {
        /// The request.
        request: ChannelRequest,
        /// Where to deliver the peer's verdict.
        reply: Option<oneshot::Sender<bool>>,
    },
    /// Extended data, such as stderr (`code` 1).
    ExtendedData {
        /// Extended data type code.
        code: u32,
        /// Payload.
        data: Vec<u8>,
    },
}

/// Connection-scoped request relayed to the backend.
///
/// `keepalive@openssh.com` never shows up here: the SSH server answers it,
/// like every global request it has no handler for, with a failure reply,
/// and clients only look for a reply of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalRequest {
    /// `tcpip-forward`.
    TcpipForward {
        /// Address to bind on the backend.
        address: String,
        /// Port to bind on the backend; 0 lets the backend choose.
        port: u32,
    },
    /// `cancel-tcpip-forward`.
    CancelTcpipForward {
        /// Bound address.
        address: String,
        /// Bound port.
        port: u32,
    },
}

/// The backend's answer to a [`GlobalRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalReply {
    /// The backend refused the request.
    Refused,
    /// The backend granted the request.
    Accepted {
        /// Port the backend bound for a `tcpip-forward` that asked for
        /// port 0.
        bound_port: Option<u32>,
    },
}

impl GlobalReply {
    /// Returns whether the request was granted.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}
