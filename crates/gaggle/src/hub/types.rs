//! Hub protocol types.
//!
//! Outbound events are serialized once per fan-out and shared between every
//! connection queue, so they are plain data with no per-recipient fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;

/// Status given to an identity when its first connection joins.
pub const DEFAULT_STATUS: &str = "online";

/// Who owns a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// Opaque per-hub connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The app a user reports as active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveApp {
    #[serde(rename = "app_id")]
    pub id: String,
    #[serde(rename = "app_name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One roster row per online identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: String,
    pub username: String,
    pub status: String,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub app: Option<ActiveApp>,
    /// Unix seconds of the last change.
    pub updated_at: i64,
}

/// A self-reported status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub user_id: String,
    pub status: String,
    pub app: Option<ActiveApp>,
}

impl StatusUpdate {
    pub fn new(user_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            status: status.into(),
            app: None,
        }
    }

    /// Attach an active app. Blank ids clear it.
    pub fn with_app(mut self, id: Option<String>, name: Option<String>) -> Self {
        self.app = id
            .filter(|id| !id.trim().is_empty())
            .map(|id| ActiveApp { id, name });
        self
    }
}

/// Point-in-time counters for one hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Distinct online identities.
    pub online: usize,
}

/// Events sent to chat hub connections.
///
/// Every transcript event carries the full current history window so a
/// client that missed an event converges on the next one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Initial state for a freshly registered connection.
    Snapshot {
        messages: Vec<ChatMessage>,
        users: Vec<String>,
    },
    /// A message was posted.
    Message {
        message: ChatMessage,
        messages: Vec<ChatMessage>,
    },
    /// A message was deleted.
    Delete {
        deleted_id: String,
        messages: Vec<ChatMessage>,
    },
    /// The transcript was cleared.
    Clear {
        deleted: usize,
        messages: Vec<ChatMessage>,
    },
    /// The set of online usernames changed.
    Presence { users: Vec<String> },
}

/// Events sent to presence hub connections.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// Full roster, sent after every change.
    Snapshot { users: Vec<PresenceEntry> },
}

/// Frames accepted from presence hub clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Status {
        status: String,
        #[serde(default)]
        app_id: Option<String>,
        #[serde(default)]
        app_name: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_presence_entry_flattens_app() {
        let entry = PresenceEntry {
            user_id: "u1".into(),
            username: "alice".into(),
            status: "playing".into(),
            app: Some(ActiveApp {
                id: "app-7".into(),
                name: Some("Tetris".into()),
            }),
            updated_at: 1_700_000_000,
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "user_id": "u1",
                "username": "alice",
                "status": "playing",
                "app_id": "app-7",
                "app_name": "Tetris",
                "updated_at": 1_700_000_000,
            })
        );

        let idle = PresenceEntry { app: None, ..entry };
        let value = serde_json::to_value(&idle).unwrap();
        assert!(value.get("app_id").is_none());
    }

    #[test]
    fn test_chat_event_tags() {
        let event = ChatEvent::Presence {
            users: vec!["alice".into()],
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "presence", "users": ["alice"]})
        );

        let event = ChatEvent::Delete {
            deleted_id: "m1".into(),
            messages: vec![],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "delete");
        assert_eq!(value["deleted_id"], "m1");
    }

    #[test]
    fn test_client_frame_parsing() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"status","status":"away"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Status {
                status: "away".into(),
                app_id: None,
                app_name: None,
            }
        );

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"chat","message":"hi"}"#).is_err());
    }

    #[test]
    fn test_status_update_ignores_blank_app() {
        let update = StatusUpdate::new("u1", "busy").with_app(Some("  ".into()), None);
        assert!(update.app.is_none());

        let update = StatusUpdate::new("u1", "busy").with_app(Some("a".into()), None);
        assert_eq!(update.app.unwrap().id, "a");
    }
}
