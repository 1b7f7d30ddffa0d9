//! Step definitions for node liveness scenarios.

pub mod given;
pub mod then;
pub mod when;
pub mod world;
