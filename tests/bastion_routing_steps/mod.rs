//! Step definitions for bastion routing scenarios.

pub mod given;
pub mod then;
pub mod when;
pub mod world;
