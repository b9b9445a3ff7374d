//! Storage layer for code harvest.
//!
//! Persists finished sessions and their aggregates using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! The daemon keeps its [`SqliteStore`] inside the lifecycle engine's lock, so
//! saves are already serialized. Reporting commands open their own connection.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`), so lexicographic order matches
//! chronological order.
//!
//! ## Day clustering
//!
//! Every save through [`SqliteStore`] refreshes the rows in
//! `aggregated_sessions` for the day the session started and for the week,
//! month and year around it. Days are built from raw sessions, coarser
//! periods from the day rows. [`Database::rebuild_aggregates`] recomputes
//! every row from scratch.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use harvest_core::{
    AggregatedSession, File, Period, Session, SessionStore, StoreError, aggregate_day,
    aggregate_higher,
};
use rusqlite::{Connection, params};
use thiserror::Error;
use uuid::Uuid;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {row_id}: {timestamp}")]
    TimestampParse {
        row_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value could not be decoded.
    #[error("invalid data for {row_id}: {message}")]
    InvalidData { row_id: String, message: String },
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                os TEXT NOT NULL,
                editor TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);

            -- One row per path per session, durations already merged
            CREATE TABLE IF NOT EXISTS session_files (
                session_id TEXT NOT NULL,
                path TEXT NOT NULL,
                name TEXT NOT NULL,
                repository TEXT NOT NULL,
                filetype TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                PRIMARY KEY (session_id, path),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_session_files_repository ON session_files(repository);

            -- repositories: JSON object of repository name -> milliseconds
            CREATE TABLE IF NOT EXISTS aggregated_sessions (
                period TEXT NOT NULL,
                bucket_start TEXT NOT NULL,
                bucket_label TEXT NOT NULL,
                total_time_ms INTEGER NOT NULL,
                repositories TEXT NOT NULL,
                PRIMARY KEY (period, bucket_start)
            );
            ",
        )?;
        Ok(())
    }

    /// Inserts a finished session and its merged files. Returns the new row ID.
    pub fn insert_session(&mut self, session: &Session) -> Result<String, DbError> {
        let id = Uuid::new_v4().to_string();
        let ended_at = session
            .ended_at
            .unwrap_or_else(|| session.started_at + Duration::milliseconds(session.duration_ms));

        let tx = self.conn.transaction()?;
        tx.execute(
            "
            INSERT INTO sessions (id, started_at, ended_at, duration_ms, os, editor)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
            params![
                id,
                format_timestamp(session.started_at),
                format_timestamp(ended_at),
                session.duration_ms,
                session.os,
                session.editor,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO session_files
                (session_id, path, name, repository, filetype, opened_at, duration_ms)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for file in session.files.values() {
                stmt.execute(params![
                    id,
                    file.path,
                    file.name,
                    file.repository,
                    file.filetype,
                    format_timestamp(file.opened_at),
                    file.duration_ms,
                ])?;
            }
        }
        tx.commit()?;
        Ok(id)
    }

    /// Lists all sessions ordered by start time, with merged files attached.
    pub fn list_sessions(&self) -> Result<Vec<Session>, DbError> {
        self.query_sessions(None)
    }

    /// Lists sessions that started within a time range.
    ///
    /// The range is inclusive of `start` and exclusive of `end`.
    pub fn list_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        self.query_sessions(Some((start, end)))
    }

    fn query_sessions(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Session>, DbError> {
        let (start, end) = range.map_or_else(
            || (String::new(), "~".to_string()),
            |(start, end)| (format_timestamp(start), format_timestamp(end)),
        );

        let mut stmt = self.conn.prepare(
            "
            SELECT id, started_at, ended_at, duration_ms, os, editor
            FROM sessions
            WHERE started_at >= ? AND started_at < ?
            ORDER BY started_at ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([&start, &end], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut ids = Vec::new();
        let mut sessions = Vec::new();
        for row in rows {
            let (id, started_at, ended_at, duration_ms, os, editor) = row?;
            let mut session = Session::start(os, editor, parse_timestamp(&started_at, &id)?);
            session.ended_at = Some(parse_timestamp(&ended_at, &id)?);
            session.duration_ms = duration_ms;
            ids.push(id);
            sessions.push(session);
        }

        let mut files = self.files_by_session(&start, &end)?;
        for (id, session) in ids.iter().zip(sessions.iter_mut()) {
            if let Some(files) = files.remove(id) {
                session.files = files;
            }
        }
        Ok(sessions)
    }

    fn files_by_session(
        &self,
        start: &str,
        end: &str,
    ) -> Result<HashMap<String, BTreeMap<String, File>>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT f.session_id, f.path, f.name, f.repository, f.filetype, f.opened_at, f.duration_ms
            FROM session_files f
            JOIN sessions s ON s.id = f.session_id
            WHERE s.started_at >= ? AND s.started_at < ?
            ",
        )?;
        let rows = stmt.query_map([start, end], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut files: HashMap<String, BTreeMap<String, File>> = HashMap::new();
        for row in rows {
            let (session_id, path, name, repository, filetype, opened_at, duration_ms) = row?;
            let file = File {
                name,
                repository,
                filetype,
                path: path.clone(),
                opened_at: parse_timestamp(&opened_at, &session_id)?,
                closed_at: None,
                duration_ms,
            };
            files.entry(session_id).or_default().insert(path, file);
        }
        Ok(files)
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?)
    }

    /// End time of the most recently finished session.
    pub fn last_session_end(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        let last: Option<String> =
            self.conn
                .query_row("SELECT MAX(ended_at) FROM sessions", [], |row| row.get(0))?;
        last.map(|ts| parse_timestamp(&ts, "sessions"))
            .transpose()
    }

    /// Recomputes the day, week, month and year aggregates containing `ts`.
    ///
    /// The day comes from raw sessions, the coarser buckets from the stored
    /// day rows, all in one transaction.
    pub fn refresh_buckets(&mut self, ts: DateTime<Utc>) -> Result<(), DbError> {
        let day = Period::Day.truncate(ts);
        let sessions = self.list_sessions_in_range(day, Period::Day.bucket_end(day))?;

        let tx = self.conn.transaction()?;
        replace_bucket(&tx, Period::Day, day, &aggregate_day(&sessions))?;
        for period in [Period::Week, Period::Month, Period::Year] {
            let start = period.truncate(ts);
            let days = query_aggregates(
                &tx,
                Period::Day,
                Some((start, period.bucket_end(start))),
            )?;
            replace_bucket(&tx, period, start, &aggregate_higher(period, &days))?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replaces every stored aggregate of `period` with the matching entries
    /// of `aggregates`. Returns the number of rows written.
    pub fn replace_aggregates(
        &mut self,
        period: Period,
        aggregates: &[AggregatedSession],
    ) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM aggregated_sessions WHERE period = ?",
            [period.as_str()],
        )?;
        let mut written = 0;
        for aggregate in aggregates.iter().filter(|a| a.period == period) {
            insert_aggregate(&tx, aggregate)?;
            written += 1;
        }
        tx.commit()?;
        Ok(written)
    }

    /// Rebuilds all aggregate periods: days from raw sessions, the rest from days.
    ///
    /// Returns the number of buckets written per period.
    pub fn rebuild_aggregates(&mut self) -> Result<Vec<(Period, usize)>, DbError> {
        let days = aggregate_day(&self.list_sessions()?);
        let mut written = vec![(Period::Day, self.replace_aggregates(Period::Day, &days)?)];
        for period in [Period::Week, Period::Month, Period::Year] {
            let buckets = aggregate_higher(period, &days);
            written.push((period, self.replace_aggregates(period, &buckets)?));
        }
        Ok(written)
    }

    /// Lists stored aggregates of `period` ordered by bucket start.
    pub fn list_aggregates(&self, period: Period) -> Result<Vec<AggregatedSession>, DbError> {
        query_aggregates(&self.conn, period, None)
    }
}

fn query_aggregates(
    conn: &Connection,
    period: Period,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<Vec<AggregatedSession>, DbError> {
    let (start, end) = range.map_or_else(
        || (String::new(), "~".to_string()),
        |(start, end)| (format_timestamp(start), format_timestamp(end)),
    );

    let mut stmt = conn.prepare(
        "
        SELECT bucket_start, bucket_label, total_time_ms, repositories
        FROM aggregated_sessions
        WHERE period = ? AND bucket_start >= ? AND bucket_start < ?
        ORDER BY bucket_start ASC
        ",
    )?;
    let rows = stmt.query_map(params![period.as_str(), start, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut aggregates = Vec::new();
    for row in rows {
        let (bucket_start, bucket_label, total_time_ms, repositories) = row?;
        let repositories =
            serde_json::from_str(&repositories).map_err(|e| DbError::InvalidData {
                row_id: bucket_label.clone(),
                message: e.to_string(),
            })?;
        aggregates.push(AggregatedSession {
            period,
            bucket_start: parse_timestamp(&bucket_start, &bucket_label)?,
            bucket_label,
            total_time_ms,
            repositories,
        });
    }
    Ok(aggregates)
}

/// Replaces the stored `period` row starting at `start`. An empty
/// `aggregates` just deletes it.
fn replace_bucket(
    conn: &Connection,
    period: Period,
    start: DateTime<Utc>,
    aggregates: &[AggregatedSession],
) -> Result<(), DbError> {
    conn.execute(
        "DELETE FROM aggregated_sessions WHERE period = ? AND bucket_start = ?",
        params![period.as_str(), format_timestamp(start)],
    )?;
    for aggregate in aggregates {
        insert_aggregate(conn, aggregate)?;
    }
    Ok(())
}

fn insert_aggregate(conn: &Connection, aggregate: &AggregatedSession) -> Result<(), DbError> {
    let repositories =
        serde_json::to_string(&aggregate.repositories).map_err(|e| DbError::InvalidData {
            row_id: aggregate.bucket_label.clone(),
            message: e.to_string(),
        })?;
    conn.execute(
        "
        INSERT OR REPLACE INTO aggregated_sessions
        (period, bucket_start, bucket_label, total_time_ms, repositories)
        VALUES (?, ?, ?, ?, ?)
        ",
        params![
            aggregate.period.as_str(),
            format_timestamp(aggregate.bucket_start),
            aggregate.bucket_label,
            aggregate.total_time_ms,
            repositories,
        ],
    )?;
    Ok(())
}

fn parse_timestamp(timestamp: &str, row_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            row_id: row_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// [`SessionStore`] backed by a SQLite file.
///
/// `connect` opens the database (creating its directory), `disconnect` closes it.
pub struct SqliteStore {
    path: PathBuf,
    db: Option<Database>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: None,
        }
    }

    fn open(&self) -> Result<Database, DbError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Database::open(&self.path)
    }
}

impl SessionStore for SqliteStore {
    fn connect(&mut self) -> Result<(), StoreError> {
        let db = self
            .open()
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        tracing::debug!(path = %self.path.display(), "session store connected");
        self.db = Some(db);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.db.take().is_some() {
            tracing::debug!(path = %self.path.display(), "session store disconnected");
        }
    }

    fn save(&mut self, session: Session) -> Result<(), StoreError> {
        let db = self.db.as_mut().ok_or(StoreError::NotConnected)?;
        let id = db
            .insert_session(&session)
            .map_err(|e| StoreError::Save(e.to_string()))?;
        // The raw session is already durable; stale buckets are fixed by the next rebuild.
        if let Err(err) = db.refresh_buckets(session.started_at) {
            tracing::warn!(error = %err, session_id = %id, "failed to refresh aggregates");
        }
        tracing::debug!(session_id = %id, files = session.files.len(), "session stored");
        Ok(())
    }
}
