//! Command-line entry point, layered configuration and server wiring for walnut.

pub mod cli;
pub mod config;
pub mod server;

pub use cli::{Cli, Commands};
pub use config::{Settings, StorageKind};
