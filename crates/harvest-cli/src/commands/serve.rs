//! Serve command: the long-running daemon.
//!
//! Startup order is store, listener, monitor, server. Shutdown runs in
//! reverse: the monitor and listener stop first, then the engine flushes or
//! drops the in-flight session and disconnects the store.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use harvest_core::{EngineConfig, LifecycleEngine, ShutdownPolicy};
use harvest_db::SqliteStore;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::Config;
use crate::monitor::HeartbeatMonitor;
use crate::server;
use crate::shutdown::{self, StopReason, StopSender};

pub fn run(config: &Config) -> Result<()> {
    config.validate().context("invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("failed to listen on {}", config.listen_addr))?;

        let (stop, _) = shutdown::channel();
        let signal_stop = stop.clone();
        tokio::spawn(async move {
            match shutdown::signal().await {
                Ok(()) => info!("received shutdown signal"),
                Err(err) => error!(error = %err, "failed to listen for shutdown signals"),
            }
            shutdown::request(&signal_stop, StopReason::Signal);
        });

        match serve(config, listener, stop).await? {
            StopReason::OrderingViolation => {
                bail!("daemon stopped after an event ordering violation")
            }
            StopReason::Signal => Ok(()),
        }
    })
}

/// Runs the daemon on `listener` until `stop` is triggered.
pub async fn serve(config: &Config, listener: TcpListener, stop: StopSender) -> Result<StopReason> {
    let engine = LifecycleEngine::new(EngineConfig {
        heartbeat_ttl_ms: config.heartbeat_ttl_ms(),
        store: Some(Box::new(SqliteStore::new(&config.database_path))),
        ..EngineConfig::default()
    })
    .context("failed to create lifecycle engine")?;
    let engine = Arc::new(engine);

    let connecting = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || connecting.connect())
        .await
        .context("store connect task failed")?
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    info!(
        addr = %listener.local_addr().context("listener has no local address")?,
        database = %config.database_path.display(),
        ttl_secs = config.heartbeat_ttl_secs,
        "harvest daemon listening"
    );

    let mut stopped = stop.subscribe();
    let monitor = HeartbeatMonitor::spawn(
        Arc::clone(&engine),
        config.heartbeat_interval(),
        stop.subscribe(),
    );
    let server = tokio::spawn(server::run(listener, Arc::clone(&engine), stop.clone()));

    shutdown::stopped(&mut stopped).await;
    let reason = stopped.borrow().unwrap_or(StopReason::Signal);
    info!(?reason, "shutting down");

    monitor.join().await;
    if let Err(err) = server.await {
        warn!(error = %err, "server task failed");
    }

    let policy = match reason {
        StopReason::OrderingViolation => ShutdownPolicy::Abandon,
        StopReason::Signal if config.flush_on_shutdown => ShutdownPolicy::Flush,
        StopReason::Signal => ShutdownPolicy::Abandon,
    };
    tokio::task::spawn_blocking(move || engine.shutdown(policy))
        .await
        .context("engine shutdown task failed")?;

    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    use harvest_core::Period;
    use harvest_db::Database;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    use crate::protocol::Response;

    async fn send_line(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        write: &mut tokio::net::tcp::OwnedWriteHalf,
        line: &str,
    ) -> Response {
        write.write_all(line.as_bytes()).await.unwrap();
        write.write_all(b"\n").await.unwrap();
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap()
    }

    fn repo(temp: &std::path::Path) -> String {
        let repo = temp.join("api");
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        let file = repo.join("main.rs");
        std::fs::write(&file, "fn main() {}\n").unwrap();
        file.display().to_string()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn signal_flushes_in_flight_session() {
        let temp = tempfile::tempdir().unwrap();
        let path = repo(temp.path());
        let config = Config {
            database_path: temp.path().join("data").join("harvest.db"),
            ..Config::default()
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, _) = shutdown::channel();
        let daemon = {
            let config = config.clone();
            let stop = stop.clone();
            tokio::spawn(async move { serve(&config, listener, stop).await })
        };

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let event = format!(r#"{{"id": "nvim-1", "os": "linux", "editor": "nvim", "path": "{path}"}}"#);

        let response = send_line(
            &mut lines,
            &mut write,
            &format!(r#"{{"method": "focus_gained", "event": {event}}}"#),
        )
        .await;
        assert!(response.ok);
        let response = send_line(
            &mut lines,
            &mut write,
            &format!(r#"{{"method": "send_heartbeat", "event": {event}}}"#),
        )
        .await;
        assert_eq!(response.reply.as_deref(), Some("Successfully sent heartbeat."));

        shutdown::request(&stop, StopReason::Signal);
        let reason = daemon.await.unwrap().unwrap();
        assert_eq!(reason, StopReason::Signal);

        let db = Database::open(&config.database_path).unwrap();
        let sessions = db.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].editor, "nvim");
        assert!(sessions[0].files.contains_key(&path));

        let days = db.list_aggregates(Period::Day).unwrap();
        assert_eq!(days.len(), 1);
        assert!(days[0].repositories.contains_key("api"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ordering_violation_stops_other_connections_and_drops_session() {
        let temp = tempfile::tempdir().unwrap();
        let path = repo(temp.path());
        let config = Config {
            database_path: temp.path().join("data").join("harvest.db"),
            ..Config::default()
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, _) = shutdown::channel();
        let daemon = {
            let config = config.clone();
            tokio::spawn(async move { serve(&config, listener, stop).await })
        };

        let event = |id: &str| {
            format!(r#"{{"id": "{id}", "os": "linux", "editor": "nvim", "path": "{path}"}}"#)
        };

        let first = TcpStream::connect(addr).await.unwrap();
        let (read, mut first_write) = first.into_split();
        let mut first_lines = BufReader::new(read).lines();
        let response = send_line(
            &mut first_lines,
            &mut first_write,
            &format!(r#"{{"method": "focus_gained", "event": {}}}"#, event("nvim-a")),
        )
        .await;
        assert!(response.ok);

        let second = TcpStream::connect(addr).await.unwrap();
        let (read, mut second_write) = second.into_split();
        let mut second_lines = BufReader::new(read).lines();
        let response = send_line(
            &mut second_lines,
            &mut second_write,
            &format!(r#"{{"method": "end_session", "event": {}}}"#, event("nvim-b")),
        )
        .await;
        assert!(!response.ok);

        // Whether or not this is read before the connection closes, it must
        // not replace (and so save) the session of nvim-a.
        let focus = format!(r#"{{"method": "focus_gained", "event": {}}}"#, event("nvim-c"));
        let _ = first_write.write_all(format!("{focus}\n").as_bytes()).await;
        if let Ok(Some(line)) = first_lines.next_line().await {
            let response: Response = serde_json::from_str(&line).unwrap();
            assert!(!response.ok, "event applied after violation: {line}");
        }

        let reason = daemon.await.unwrap().unwrap();
        assert_eq!(reason, StopReason::OrderingViolation);

        let db = Database::open(&config.database_path).unwrap();
        assert_eq!(db.session_count().unwrap(), 0);
        assert!(db.list_aggregates(Period::Day).unwrap().is_empty());
    }
}
