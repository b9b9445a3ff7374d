//! CLI subcommand implementations.

pub mod aggregate;
pub mod report;
pub mod send;
pub mod serve;
pub mod status;
