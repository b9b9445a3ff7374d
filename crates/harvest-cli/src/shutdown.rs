//! Shutdown signalling shared by the server, the heartbeat monitor and `serve`.

use tokio::sync::watch;

/// Why the daemon is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT or SIGTERM.
    Signal,
    /// An editor ended a session it did not own. The engine state can no
    /// longer be trusted, so the process exits with an error.
    OrderingViolation,
}

pub type StopSender = watch::Sender<Option<StopReason>>;
pub type StopReceiver = watch::Receiver<Option<StopReason>>;

pub fn channel() -> (StopSender, StopReceiver) {
    watch::channel(None)
}

/// Requests shutdown. The first reason wins.
pub fn request(stop: &StopSender, reason: StopReason) {
    stop.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    });
}

/// Resolves once shutdown has been requested (or every sender is gone).
pub async fn stopped(rx: &mut StopReceiver) {
    while rx.borrow_and_update().is_none() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Waits for SIGINT or SIGTERM.
pub async fn signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
