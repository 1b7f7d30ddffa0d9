//! Adapter implementations for fleet persistence and node agent ports.

pub mod memory;

mod http;

pub use http::HttpNodeAgent;
