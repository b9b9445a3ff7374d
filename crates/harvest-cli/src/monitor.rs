//! Periodic stale-session detection.

use std::sync::Arc;
use std::time::Duration;

use harvest_core::LifecycleEngine;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::shutdown::{self, StopReceiver};

/// Background task that asks the engine to close sessions whose editor went
/// silent.
pub struct HeartbeatMonitor {
    handle: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// Starts the monitor. The first check happens one `interval` after start.
    pub fn spawn(engine: Arc<LifecycleEngine>, interval: Duration, stop: StopReceiver) -> Self {
        let handle = tokio::spawn(run(engine, interval, stop));
        Self { handle }
    }

    /// Waits for the monitor to exit after shutdown has been requested.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            warn!(error = %err, "heartbeat monitor task failed");
        }
    }
}

async fn run(engine: Arc<LifecycleEngine>, interval: Duration, mut stop: StopReceiver) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    debug!(interval_ms = interval.as_millis(), "heartbeat monitor started");

    loop {
        tokio::select! {
            () = shutdown::stopped(&mut stop) => break,
            _ = ticker.tick() => {}
        }

        let engine = Arc::clone(&engine);
        let check = tokio::task::spawn_blocking(move || engine.check_heartbeat());
        tokio::select! {
            () = shutdown::stopped(&mut stop) => break,
            result = check => match result {
                Ok(true) => info!("stale session closed"),
                Ok(false) => {}
                Err(err) => warn!(error = %err, "heartbeat check failed"),
            },
        }
    }
    debug!("heartbeat monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use chrono::Duration as ChronoDuration;
    use harvest_core::{
        ClientId, EngineConfig, Event, ManualClock, Session, SessionStore, StoreError,
    };

    use crate::shutdown::StopReason;

    struct SharedStore(Arc<Mutex<Vec<Session>>>);

    impl SessionStore for SharedStore {
        fn connect(&mut self) -> Result<(), StoreError> {
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn save(&mut self, session: Session) -> Result<(), StoreError> {
            self.0.lock().unwrap().push(session);
            Ok(())
        }
    }

    #[tokio::test]
    async fn monitor_closes_stale_session_and_stops() {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(ManualClock::at_epoch());
        let engine = Arc::new(
            LifecycleEngine::new(EngineConfig {
                heartbeat_ttl_ms: 1000,
                clock: Some(clock.clone()),
                store: Some(Box::new(SharedStore(Arc::clone(&saved)))),
                ..EngineConfig::default()
            })
            .unwrap(),
        );

        let event = Event::new(ClientId::new("A").unwrap(), "linux", "nvim", "/tmp/a.rs");
        engine.focus_gained(&event).unwrap();
        assert!(engine.snapshot().session.is_some());
        clock.advance(ChronoDuration::milliseconds(1500));

        let (stop_tx, stop_rx) = shutdown::channel();
        let monitor = HeartbeatMonitor::spawn(Arc::clone(&engine), Duration::from_millis(10), stop_rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.snapshot().session.is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("monitor should close the stale session");

        // No file was ever opened, so there was nothing worth saving.
        assert!(saved.lock().unwrap().is_empty());
        assert!(engine.snapshot().active_client.is_none());

        shutdown::request(&stop_tx, StopReason::Signal);
        tokio::time::timeout(Duration::from_secs(5), monitor.join())
            .await
            .expect("monitor should stop");
    }
}
