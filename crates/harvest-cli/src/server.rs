//! TCP transport for editor events.
//!
//! Every connection may carry many request lines. Requests are applied to the
//! lifecycle engine on the blocking pool because the engine takes a blocking
//! lock and may walk the filesystem or write to SQLite. Once shutdown is
//! requested, connections stop reading.

use std::sync::Arc;

use harvest_core::{EngineError, LifecycleEngine};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use crate::protocol::{MAX_REQUEST_BYTES, Method, Request, Response};
use crate::shutdown::{self, StopReason, StopSender};

/// Accepts connections until shutdown is requested.
pub async fn run(listener: TcpListener, engine: Arc<LifecycleEngine>, stop: StopSender) {
    let mut stopped = stop.subscribe();
    loop {
        tokio::select! {
            () = shutdown::stopped(&mut stopped) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    tokio::spawn(handle_connection(stream, Arc::clone(&engine), stop.clone()));
                }
                Err(err) => warn!(error = %err, "failed to accept connection"),
            },
        }
    }
    debug!("listener closed");
}

/// Serves one connection until it closes or shutdown is requested. A request
/// that is already being applied still gets its response.
async fn handle_connection(stream: TcpStream, engine: Arc<LifecycleEngine>, stop: StopSender) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let limit = u64::try_from(MAX_REQUEST_BYTES).unwrap_or(u64::MAX) + 1;
    let mut stopped = stop.subscribe();

    loop {
        let mut line = String::new();
        let mut limited = (&mut reader).take(limit);
        let read = tokio::select! {
            biased;
            () = shutdown::stopped(&mut stopped) => {
                debug!("closing connection for shutdown");
                return;
            }
            read = limited.read_line(&mut line) => read,
        };
        let read = match read {
            Ok(read) => read,
            Err(err) => {
                warn!(error = %err, "failed to read request");
                return;
            }
        };
        if read == 0 {
            return;
        }

        let too_large = line.len() > MAX_REQUEST_BYTES;
        let (response, fatal) = if too_large {
            (Response::error("request exceeded maximum size"), false)
        } else if line.trim().is_empty() {
            continue;
        } else {
            match serde_json::from_str::<Request>(&line) {
                Ok(request) => apply(&engine, request).await,
                Err(err) => (
                    Response::error(format!("request was not valid JSON: {err}")),
                    false,
                ),
            }
        };

        // The editor gets its answer before the daemon starts shutting down.
        let written = write_response(&mut write, &response).await;
        if fatal {
            shutdown::request(&stop, StopReason::OrderingViolation);
            return;
        }
        if let Err(err) = written {
            warn!(error = %err, "failed to write response");
            return;
        }
        if too_large {
            return;
        }
    }
}

async fn write_response<W: AsyncWriteExt + Unpin>(
    write: &mut W,
    response: &Response,
) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    write.write_all(&bytes).await?;
    write.flush().await
}

/// Runs `request` on the blocking pool. The flag is set when the daemon
/// must stop after answering.
async fn apply(engine: &Arc<LifecycleEngine>, request: Request) -> (Response, bool) {
    debug!(method = ?request.method, "request received");
    let engine = Arc::clone(engine);
    let outcome = tokio::task::spawn_blocking(move || dispatch(&engine, request)).await;

    match outcome {
        Ok(Ok(response)) => (response, false),
        Ok(Err(err @ EngineError::OrderingViolation { .. })) => {
            error!(error = %err, "event ordering violated, shutting down");
            (Response::error(err.to_string()), true)
        }
        Ok(Err(err)) => (Response::error(err.to_string()), false),
        Err(err) => {
            error!(error = %err, "engine task failed");
            (Response::error("internal error"), false)
        }
    }
}

/// Applies one request to the engine.
pub fn dispatch(engine: &LifecycleEngine, request: Request) -> Result<Response, EngineError> {
    let ack = match (request.method, request.event) {
        (Method::Status, _) => return Ok(Response::status(engine.snapshot())),
        (_, None) => return Ok(Response::error("event is required")),
        (Method::FocusGained, Some(event)) => engine.focus_gained(&event)?,
        (Method::OpenFile, Some(event)) => engine.open_file(&event)?,
        (Method::SendHeartbeat, Some(event)) => engine.heartbeat(&event)?,
        (Method::EndSession, Some(event)) => engine.end_session(&event)?,
    };
    Ok(Response::reply(ack))
}
