//! Line-delimited JSON protocol between editors and the daemon.
//!
//! Each request is a single JSON object followed by `\n`; the daemon answers
//! each line with exactly one response line.

use clap::ValueEnum;
use harvest_core::{EngineSnapshot, Event};
use serde::{Deserialize, Serialize};

/// Requests larger than this are rejected.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    FocusGained,
    OpenFile,
    SendHeartbeat,
    EndSession,
    Status,
}

impl Method {
    pub const fn requires_event(self) -> bool {
        !matches!(self, Self::Status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EngineSnapshot>,
}

impl Response {
    pub fn reply(reply: impl Into<String>) -> Self {
        Self {
            ok: true,
            reply: Some(reply.into()),
            error: None,
            status: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            reply: None,
            error: Some(message.into()),
            status: None,
        }
    }

    pub fn status(snapshot: EngineSnapshot) -> Self {
        Self {
            ok: true,
            reply: None,
            error: None,
            status: Some(snapshot),
        }
    }
}
