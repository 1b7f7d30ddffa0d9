//! SSH bastion gateway for Warren.
//!
//! Users connect to one well-known SSH endpoint. The bastion authenticates
//! them against the user directory, looks up their container in the fleet
//! registry, and relays the session to the node hosting it. Users without a
//! container get a short banner instead.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`], including the russh server
//! - Authentication, routing and relaying in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
