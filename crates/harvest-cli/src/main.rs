use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use harvest_cli::commands::send::EventArgs;
use harvest_cli::commands::{aggregate, report, send, serve, status};
use harvest_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(harvest_db::Database, Config)> {
    let config = load_config(config_path)?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = harvest_db::Database::open(&config.database_path)
        .context("failed to open database")?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so `send status` output stays parseable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let mut stdout = io::stdout().lock();
    match cli.command {
        Some(Commands::Serve) => {
            let config = load_config(cli.config.as_deref())?;
            serve::run(&config)?;
        }
        Some(Commands::Send {
            method,
            id,
            os,
            editor,
            path,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            let args = EventArgs {
                id,
                os,
                editor,
                path,
            };
            send::run(&mut stdout, &config.listen_addr, method, args)?;
        }
        Some(Commands::Report {
            period,
            limit,
            json,
        }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            report::run(&mut stdout, &db, period, limit, json)?;
        }
        Some(Commands::Aggregate) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            aggregate::run(&mut stdout, &mut db)?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &config, &db)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
