//! Session lifecycle engine.
//!
//! Turns the stream of editor events into coding sessions. Exactly one session
//! is in flight at a time and it belongs to the *active client*: the editor
//! instance that last gained focus. Every state change happens under the
//! engine lock, so transport handlers and the heartbeat monitor never
//! interleave. Metadata lookups run before the lock is taken; saving a
//! closed session is the only I/O done while holding it.
//!
//! An `EndSession` from a client that is not active halts the engine. From
//! then on every operation fails with [`EngineError::Halted`] and the
//! in-flight session is never saved.
//!
//! # State machine
//!
//! ```text
//!   Idle ──focus/open/heartbeat──▶ Active ──end/stale/focus(other)/shutdown──▶ Idle
//! ```
//!
//! Closing a session archives the current file, merges all visited intervals
//! by path and hands the result to the [`SessionStore`]. Sessions without a
//! single resolved file are dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::event::Event;
use crate::metadata::{FileMetadata, GitMetadataResolver, MetadataError, MetadataResolver};
use crate::session::{File, Session};
use crate::store::{SessionStore, StoreError};
use crate::types::ClientId;

/// Default time without heartbeats before a session counts as abandoned.
pub const DEFAULT_HEARTBEAT_TTL_MS: i64 = 10 * 60 * 1000;

/// Acknowledgement returned to the remote caller.
pub type Ack = &'static str;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a session store is required")]
    MissingStore,
    #[error("heartbeat TTL must be positive, got {0} ms")]
    InvalidHeartbeatTtl(i64),
    /// `EndSession` arrived from a client that is not the active one. Events
    /// are no longer arriving in the order the editors sent them.
    #[error("end of session requested by {received} while {active} is the active client")]
    OrderingViolation { active: ClientId, received: ClientId },
    /// An earlier ordering violation stopped the engine.
    #[error("the engine was halted by an event ordering violation")]
    Halted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Construction options for [`LifecycleEngine`].
///
/// Only the store is required; the clock and resolver fall back to
/// [`SystemClock`] and [`GitMetadataResolver`].
pub struct EngineConfig {
    /// Time without heartbeats after which a session is closed. Default: 10 minutes.
    pub heartbeat_ttl_ms: i64,
    pub clock: Option<Arc<dyn Clock>>,
    pub resolver: Option<Arc<dyn MetadataResolver>>,
    pub store: Option<Box<dyn SessionStore>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_ms: DEFAULT_HEARTBEAT_TTL_MS,
            clock: None,
            resolver: None,
            store: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("heartbeat_ttl_ms", &self.heartbeat_ttl_ms)
            .field("clock", &self.clock.is_some())
            .field("resolver", &self.resolver.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

/// What to do with an in-flight session when the host stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Close and save it as if the editor had ended it.
    Flush,
    /// Drop it without saving.
    Abandon,
}

#[derive(Debug, Clone, Copy)]
enum CloseReason {
    Replaced,
    Ended,
    Abandoned,
    Shutdown,
}

impl CloseReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Replaced => "replaced",
            Self::Ended => "ended",
            Self::Abandoned => "abandoned",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Read-only view of the engine, served to `status` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Set once an ordering violation has stopped the engine.
    #[serde(default)]
    pub halted: bool,
    pub active_client: Option<ClientId>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub session: Option<SessionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub started_at: DateTime<Utc>,
    pub os: String,
    pub editor: String,
    pub current_file: Option<String>,
    pub archived_intervals: usize,
}

struct EngineState {
    halted: bool,
    active_client: Option<ClientId>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    session: Option<Session>,
    store: Box<dyn SessionStore>,
}

/// Owns the in-flight session and applies editor events to it.
pub struct LifecycleEngine {
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn MetadataResolver>,
    heartbeat_ttl: Duration,
    state: Mutex<EngineState>,
}

impl LifecycleEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let store = config.store.ok_or(EngineError::MissingStore)?;
        if config.heartbeat_ttl_ms <= 0 {
            return Err(EngineError::InvalidHeartbeatTtl(config.heartbeat_ttl_ms));
        }

        Ok(Self {
            clock: config.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            resolver: config
                .resolver
                .unwrap_or_else(|| Arc::new(GitMetadataResolver)),
            heartbeat_ttl: Duration::milliseconds(config.heartbeat_ttl_ms),
            state: Mutex::new(EngineState {
                halted: false,
                active_client: None,
                last_heartbeat_at: None,
                session: None,
                store,
            }),
        })
    }

    /// Connects the underlying store. Called once when the host starts.
    pub fn connect(&self) -> Result<(), EngineError> {
        self.lock().store.connect()?;
        Ok(())
    }

    /// Called when an editor instance gains focus.
    ///
    /// Focus bounces between the editor and terminal splits constantly, so the
    /// same client regaining focus must not start a new session. A different
    /// client replaces the current session.
    pub fn focus_gained(&self, event: &Event) -> Result<Ack, EngineError> {
        if let Some(ack) = self.focus_returned(&mut *self.running()?, event) {
            return Ok(ack);
        }

        let resolved = self.resolver.resolve(&event.path);
        let mut state = self.running()?;
        // Another request for this client may have won the race for the lock.
        if let Some(ack) = self.focus_returned(&mut state, event) {
            return Ok(ack);
        }

        let now = self.clock.now();
        state.last_heartbeat_at = Some(now);
        if state.session.is_some() {
            Self::close_session(&mut state, now, CloseReason::Replaced);
        }

        Self::start_session(&mut state, event, now);
        // An instance that already has a buffer open won't send OpenFile.
        Self::update_current_file(&mut state, &event.path, resolved, now);
        Ok("Successfully updated the client being focused.")
    }

    /// Called when a buffer is entered.
    pub fn open_file(&self, event: &Event) -> Result<Ack, EngineError> {
        tracing::debug!(client = %event.client_id, path = %event.path, "open file");
        let resolved = self.resolver.resolve(&event.path);

        let mut state = self.running()?;
        let now = self.clock.now();
        state.last_heartbeat_at = Some(now);

        // The first editor instance may never send a focus event, and a stale
        // check may have closed the session while the buffer stayed open.
        if state.session.is_none() {
            Self::start_session(&mut state, event, now);
        }

        Self::update_current_file(&mut state, &event.path, resolved, now);
        Ok("Successfully updated the current file.")
    }

    /// Called periodically by the editor (e.g. on buffer writes).
    ///
    /// The path is only resolved when the heartbeat has to start a session.
    pub fn heartbeat(&self, event: &Event) -> Result<Ack, EngineError> {
        let mut resolved = None;
        loop {
            let mut state = self.running()?;
            let now = self.clock.now();

            if state.session.is_some() {
                state.last_heartbeat_at = Some(now);
                return Ok("Successfully sent heartbeat.");
            }

            if let Some(resolved) = resolved.take() {
                tracing::debug!(
                    client = %event.client_id,
                    path = %event.path,
                    "session was ended by a previous heartbeat check, starting a new one"
                );
                Self::start_session(&mut state, event, now);
                Self::update_current_file(&mut state, &event.path, resolved, now);
                state.last_heartbeat_at = Some(now);
                return Ok("Successfully sent heartbeat.");
            }

            drop(state);
            resolved = Some(self.resolver.resolve(&event.path));
        }
    }

    /// Called when an editor instance exits.
    ///
    /// If another client is active this returns
    /// [`EngineError::OrderingViolation`] and halts the engine: the in-flight
    /// session is left untouched and every later operation fails with
    /// [`EngineError::Halted`].
    pub fn end_session(&self, event: &Event) -> Result<Ack, EngineError> {
        let mut state = self.running()?;

        if let Some(active) = &state.active_client {
            if *active != event.client_id {
                let err = EngineError::OrderingViolation {
                    active: active.clone(),
                    received: event.client_id.clone(),
                };
                state.halted = true;
                return Err(err);
            }
        }

        if state.active_client.is_none() && state.session.is_none() {
            tracing::debug!(
                client = %event.client_id,
                "session already ended, possibly by a heartbeat check"
            );
            return Ok("The session had already ended.");
        }

        let now = self.clock.now();
        Self::close_session(&mut state, now, CloseReason::Ended);
        Ok("The session was ended successfully.")
    }

    /// Closes the session if no heartbeat arrived within the TTL.
    ///
    /// Returns `true` if a session was closed. A session whose last heartbeat
    /// is exactly one TTL old stays open.
    pub fn check_heartbeat(&self) -> bool {
        let Ok(mut state) = self.running() else {
            return false;
        };
        let now = self.clock.now();

        let stale = state.session.is_some()
            && state
                .last_heartbeat_at
                .is_none_or(|last| now - last > self.heartbeat_ttl);
        if !stale {
            return false;
        }

        tracing::info!(
            last_heartbeat_at = ?state.last_heartbeat_at,
            ttl_ms = self.heartbeat_ttl.num_milliseconds(),
            "closing stale session"
        );
        Self::close_session(&mut state, now, CloseReason::Abandoned);
        true
    }

    /// Flushes or drops the in-flight session, then disconnects the store.
    ///
    /// A halted engine always drops the session.
    pub fn shutdown(&self, policy: ShutdownPolicy) {
        let mut state = self.lock();
        let policy = if state.halted {
            ShutdownPolicy::Abandon
        } else {
            policy
        };
        match policy {
            ShutdownPolicy::Flush => {
                if state.session.is_some() {
                    let now = self.clock.now();
                    Self::close_session(&mut state, now, CloseReason::Shutdown);
                }
            }
            ShutdownPolicy::Abandon => {
                if state.session.take().is_some() {
                    tracing::warn!(
                        client = ?state.active_client,
                        "dropping in-flight session without saving"
                    );
                }
                state.active_client = None;
            }
        }
        state.store.disconnect();
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.lock();
        EngineSnapshot {
            halted: state.halted,
            active_client: state.active_client.clone(),
            last_heartbeat_at: state.last_heartbeat_at,
            session: state.session.as_ref().map(|s| SessionSnapshot {
                started_at: s.started_at,
                os: s.os.clone(),
                editor: s.editor.clone(),
                current_file: s.current_file.as_ref().map(|f| f.path.clone()),
                archived_intervals: s.open_files.len(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> Result<MutexGuard<'_, EngineState>, EngineError> {
        let state = self.lock();
        if state.halted {
            return Err(EngineError::Halted);
        }
        Ok(state)
    }

    /// Handles focus coming back to the active client.
    fn focus_returned(&self, state: &mut EngineState, event: &Event) -> Option<Ack> {
        if state.active_client.as_ref() != Some(&event.client_id) {
            return None;
        }
        state.last_heartbeat_at = Some(self.clock.now());
        tracing::debug!(client = %event.client_id, "focus returned to the active client");
        Some("Focus returned to the active client.")
    }

    fn start_session(state: &mut EngineState, event: &Event, now: DateTime<Utc>) {
        tracing::debug!(client = %event.client_id, editor = %event.editor, "starting session");
        state.active_client = Some(event.client_id.clone());
        state.session = Some(Session::start(&event.os, &event.editor, now));
    }

    fn update_current_file(
        state: &mut EngineState,
        path: &str,
        resolved: Result<FileMetadata, MetadataError>,
        now: DateTime<Utc>,
    ) {
        let metadata = match resolved {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::debug!(path, error = %err, "could not extract metadata for the path");
                return;
            }
        };
        let Some(session) = state.session.as_mut() else {
            return;
        };

        session.switch_to(File::open(path, metadata, now));
        tracing::debug!(path, "updated the current file");
    }

    fn close_session(state: &mut EngineState, now: DateTime<Utc>, reason: CloseReason) {
        // Whatever happens below, the engine is idle afterwards.
        let client = state.active_client.take();
        let Some(mut session) = state.session.take() else {
            tracing::debug!("there was no session to save");
            return;
        };

        session.finish(now);

        if session.files.is_empty() {
            tracing::debug!(
                client = ?client,
                reason = reason.as_str(),
                "session had no files, not saving"
            );
            return;
        }

        let files = session.files.len();
        let duration_ms = session.duration_ms;
        match state.store.save(session) {
            Ok(()) => tracing::info!(
                client = ?client,
                reason = reason.as_str(),
                files,
                duration_ms,
                "session saved"
            ),
            Err(err) => tracing::error!(
                error = %err,
                client = ?client,
                reason = reason.as_str(),
                "failed to save session"
            ),
        }
    }
}
