//! Adapter implementations of the bastion ports.

mod file;
pub mod memory;
pub mod ssh;

pub use file::JsonFileUserDirectory;
