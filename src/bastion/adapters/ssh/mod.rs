//! russh-backed adapters: the client-facing SSH server, the backend
//! connector, and the gateway's persistent key.

mod backend;
mod channels;
mod convert;
mod host_key;
mod server;

pub use backend::SshBackendConnector;
pub use host_key::HostKey;
pub use server::SshGateway;

use crate::bastion::domain::BastionError;

impl From<russh::Error> for BastionError {
    fn from(err: russh::Error) -> Self {
        Self::transport(err)
    }
}
