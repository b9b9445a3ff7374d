//! Status command: database summary plus the live session, if a daemon runs.

use std::io::Write;

use anyhow::Result;
use chrono::SecondsFormat;
use harvest_core::{ClientId, EngineSnapshot};
use harvest_db::Database;

use crate::Config;
use crate::client;
use crate::protocol::{Method, Request};

pub fn run<W: Write>(writer: &mut W, config: &Config, db: &Database) -> Result<()> {
    let daemon = query_daemon(&config.listen_addr);
    write_status(writer, config, db, daemon.as_ref())
}

fn query_daemon(addr: &str) -> Option<EngineSnapshot> {
    let request = Request {
        method: Method::Status,
        event: None,
    };
    match client::send(addr, &request) {
        Ok(response) => response.status,
        Err(err) => {
            tracing::debug!(error = %err, addr, "daemon not reachable");
            None
        }
    }
}

pub fn write_status<W: Write>(
    writer: &mut W,
    config: &Config,
    db: &Database,
    daemon: Option<&EngineSnapshot>,
) -> Result<()> {
    let sessions = db.session_count()?;
    let last_end = db.last_session_end()?;

    writeln!(writer, "Harvest status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(writer, "Sessions: {sessions}")?;
    match last_end {
        Some(ts) => writeln!(
            writer,
            "Last session ended: {}",
            ts.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?,
        None => writeln!(writer, "Last session ended: never")?,
    }

    let Some(snapshot) = daemon else {
        writeln!(writer, "Daemon: not reachable at {}", config.listen_addr)?;
        return Ok(());
    };
    if snapshot.halted {
        writeln!(
            writer,
            "Daemon: stopping after an event ordering violation at {}",
            config.listen_addr
        )?;
        return Ok(());
    }
    writeln!(writer, "Daemon: running at {}", config.listen_addr)?;

    let Some(session) = &snapshot.session else {
        writeln!(writer, "Active session: none")?;
        return Ok(());
    };
    let client = snapshot
        .active_client
        .as_ref()
        .map_or("unknown", ClientId::as_str);
    writeln!(writer, "Active session: {client} ({} on {})", session.editor, session.os)?;
    writeln!(
        writer,
        "  Started: {}",
        session.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )?;
    writeln!(
        writer,
        "  Current file: {}",
        session.current_file.as_deref().unwrap_or("none")
    )?;
    writeln!(writer, "  Archived intervals: {}", session.archived_intervals)?;
    if let Some(last) = snapshot.last_heartbeat_at {
        writeln!(
            writer,
            "  Last heartbeat: {}",
            last.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
    }

    Ok(())
}
