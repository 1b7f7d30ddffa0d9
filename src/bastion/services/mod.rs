//! Service layer for the bastion: authentication, routing and relaying.

mod auth;
mod broker;
mod relay;

pub use auth::Authenticator;
pub use broker::{DEFAULT_BANNER, SessionBroker, SessionPlan};
pub use relay::{forward_global_request, relay_channel};
