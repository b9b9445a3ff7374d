//! Editor events delivered by the transport.

use serde::{Deserialize, Serialize};

use crate::types::ClientId;

/// An activity signal sent by an editor instance.
///
/// The shape is the same for every operation; `path` is ignored where it
/// carries no meaning (e.g. ending a session).
///
/// # Path Safety
///
/// `path` is stored as-is from the editor. It is only ever handed to the
/// metadata resolver, which reads repository metadata next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The editor instance that emitted the event.
    #[serde(rename = "id")]
    pub client_id: ClientId,
    /// Operating system of the editor host (e.g. "linux").
    pub os: String,
    /// Editor name (e.g. "nvim").
    pub editor: String,
    /// Absolute path of the buffer the event refers to.
    #[serde(default)]
    pub path: String,
}

impl Event {
    pub fn new(
        client_id: ClientId,
        os: impl Into<String>,
        editor: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            client_id,
            os: os.into(),
            editor: editor.into(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_parses_editor_payload() {
        let json = r#"{"id": "nvim-1", "os": "linux", "editor": "nvim", "path": "/repo/a.go"}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        assert_eq!(event.client_id.as_str(), "nvim-1");
        assert_eq!(event.editor, "nvim");
        assert_eq!(event.path, "/repo/a.go");
    }

    #[test]
    fn event_path_defaults_to_empty() {
        let json = r#"{"id": "nvim-1", "os": "linux", "editor": "nvim"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(event.path.is_empty());
    }

    #[test]
    fn event_rejects_empty_client_id() {
        let json = r#"{"id": "", "os": "linux", "editor": "nvim", "path": ""}"#;
        let result: Result<Event, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
