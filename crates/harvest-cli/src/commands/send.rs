//! Send command: forwards one editor event to the daemon.

use std::io::Write;

use anyhow::{Context, Result, bail};
use harvest_core::{ClientId, Event};

use crate::client;
use crate::protocol::{Method, Request, Response};

/// Event fields given on the command line.
#[derive(Debug, Clone)]
pub struct EventArgs {
    pub id: Option<String>,
    pub os: String,
    pub editor: String,
    pub path: String,
}

/// Builds the request for `method`, validating the event when one is needed.
pub fn build_request(method: Method, args: EventArgs) -> Result<Request> {
    if !method.requires_event() {
        return Ok(Request {
            method,
            event: None,
        });
    }

    let id = args.id.context("--id is required for this method")?;
    let client_id = ClientId::new(id).context("invalid --id")?;
    Ok(Request {
        method,
        event: Some(Event::new(client_id, args.os, args.editor, args.path)),
    })
}

pub fn run<W: Write>(writer: &mut W, addr: &str, method: Method, args: EventArgs) -> Result<()> {
    let request = build_request(method, args)?;
    let response =
        client::send(addr, &request).with_context(|| format!("failed to send {method:?}"))?;
    write_response(writer, &response)
}

fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    if !response.ok {
        bail!(
            "daemon rejected request: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(reply) = &response.reply {
        writeln!(writer, "{reply}")?;
    }
    if let Some(status) = &response.status {
        serde_json::to_writer_pretty(&mut *writer, status)?;
        writeln!(writer)?;
    }
    Ok(())
}
