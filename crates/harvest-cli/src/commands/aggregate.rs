//! Rebuilds every stored aggregate from raw sessions.

use std::io::Write;

use anyhow::{Context, Result};
use harvest_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &mut Database) -> Result<()> {
    let written = db
        .rebuild_aggregates()
        .context("failed to rebuild aggregates")?;
    tracing::info!(?written, "aggregates rebuilt");

    for (period, count) in written {
        writeln!(writer, "{:<6} {count} buckets", period.as_str())?;
    }
    Ok(())
}
