//! In-memory adapters for the bastion ports.

mod backend;
mod channel;
mod directory;

pub use backend::{
    CHOSEN_FORWARD_PORT, DialBehaviour, InMemoryBackendConnector, InMemoryBackendSession,
};
pub use channel::{ChannelPeer, RecordingControl, loopback_channel};
pub use directory::InMemoryUserDirectory;
