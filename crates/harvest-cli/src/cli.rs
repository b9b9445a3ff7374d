//! Command-line argument definitions.

use std::path::PathBuf;

use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Parser, Subcommand};
use harvest_core::Period;

use crate::protocol::Method;

/// Coding session tracker.
///
/// Editors report focus, file and heartbeat events to a local daemon, which
/// turns them into sessions and rolls them up into daily, weekly, monthly
/// and yearly summaries.
#[derive(Debug, Parser)]
#[command(name = "harvest", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the daemon that receives editor events.
    Serve,

    /// Send a single event to a running daemon.
    Send {
        /// Event to send.
        #[arg(value_enum)]
        method: Method,

        /// Editor instance ID.
        #[arg(long)]
        id: Option<String>,

        /// Operating system reported by the editor.
        #[arg(long, default_value = std::env::consts::OS)]
        os: String,

        /// Editor name.
        #[arg(long, default_value = "unknown")]
        editor: String,

        /// Absolute path of the current buffer.
        #[arg(long, default_value = "")]
        path: String,
    },

    /// Show time spent per repository.
    Report {
        /// Bucket size.
        #[arg(
            default_value = "week",
            value_parser = PossibleValuesParser::new(Period::ALL.map(|p| p.as_str()))
                .try_map(|s| s.parse::<Period>())
        )]
        period: Period,

        /// Show only the most recent N buckets.
        #[arg(long)]
        limit: Option<usize>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebuild every aggregate from stored sessions.
    Aggregate,

    /// Show daemon and database status.
    Status,
}
