//! Harvest CLI library.
//!
//! This crate provides the daemon that turns editor events into coding
//! sessions, the client editors use to reach it, and the reporting commands.

mod cli;
pub mod client;
pub mod commands;
mod config;
pub mod monitor;
pub mod protocol;
pub mod server;
pub mod shutdown;

pub use cli::{Cli, Commands};
pub use config::{Config, ConfigError};
