//! Port contracts for the bastion: the user directory, backend sessions,
//! and per-channel control.

mod backend;
mod channel;
mod directory;

pub use backend::{BackendConnector, BackendLink, BackendSession, BackendTarget, InboundChannel};
pub use channel::{ChannelControl, ChannelEndpoint};
pub use directory::UserDirectory;
