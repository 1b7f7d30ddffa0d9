//! Domain model for the SSH bastion: credentials, directory users, the
//! per-connection routing context, and the channel vocabulary relayed
//! between client and backend.

mod channel;
mod context;
mod credential;
mod error;
mod user;

pub use channel::{
    ChannelEvent, ChannelKind, ChannelRequest, GlobalReply, GlobalRequest, PtyRequest, TcpipTarget,
    WindowSize,
};
pub use context::{ConnectionContext, Route};
pub use credential::{AuthorizedKey, AuthorizedKeyError, OfferedCredential, PasswordHash};
pub use error::{BastionError, BastionResult};
pub use user::DirectoryUser;
