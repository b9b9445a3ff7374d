//! Blocking client used by `send` and `status` to talk to a running daemon.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{MAX_REQUEST_BYTES, Request, Response};

const CONNECT_TIMEOUT_MS: u64 = 1000;
const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not resolve daemon address {0}")]
    Address(String),
    #[error("failed to connect to daemon at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("failed to talk to daemon: {0}")]
    Io(#[from] std::io::Error),
    #[error("daemon closed the connection without responding")]
    NoResponse,
    #[error("response exceeded maximum size")]
    ResponseTooLarge,
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sends one request and waits for its response line.
pub fn send(addr: &str, request: &Request) -> Result<Response, ClientError> {
    let socket = std::net::ToSocketAddrs::to_socket_addrs(addr)
        .map_err(|_| ClientError::Address(addr.to_string()))?
        .next()
        .ok_or_else(|| ClientError::Address(addr.to_string()))?;

    let mut stream =
        TcpStream::connect_timeout(&socket, Duration::from_millis(CONNECT_TIMEOUT_MS)).map_err(
            |source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            },
        )?;
    stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))?;
    stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)))?;

    let mut payload = serde_json::to_vec(request)?;
    payload.push(b'\n');
    stream.write_all(&payload)?;
    stream.flush()?;

    let limit = u64::try_from(MAX_REQUEST_BYTES).unwrap_or(u64::MAX) + 1;
    let mut reader = BufReader::new(stream).take(limit);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(ClientError::NoResponse);
    }
    if line.len() > MAX_REQUEST_BYTES {
        return Err(ClientError::ResponseTooLarge);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
