//! Persistence contract for finished sessions.

use thiserror::Error;

use crate::session::Session;

/// Errors a session store can report.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not connected")]
    NotConnected,
    #[error("failed to connect to store: {0}")]
    Connect(String),
    #[error("failed to save session: {0}")]
    Save(String),
}

/// Durable sink for finished sessions.
///
/// `connect` is called once when the host starts and `disconnect` once when it
/// stops. `save` receives ownership of the session; the engine keeps nothing
/// after handing it over and never retries a failed save.
pub trait SessionStore: Send {
    fn connect(&mut self) -> Result<(), StoreError>;

    fn disconnect(&mut self);

    fn save(&mut self, session: Session) -> Result<(), StoreError>;
}
