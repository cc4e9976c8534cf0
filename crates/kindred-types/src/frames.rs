use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{ContentKind, Message};

/// Frames sent FROM client TO server over the real-time connection.
///
/// The `type` tag is decoded exactly once at the transport boundary; anything
/// that does not fit one of these variants is a malformed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    /// Keepalive; answered with `Pong`.
    Heartbeat {
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// Ask which of the listed users currently have a live session.
    /// Entries that are not valid ids are skipped.
    PresenceQuery {
        #[serde(default)]
        user_ids: Vec<String>,
    },

    /// Send a chat message. `sender_id`, when present, must match the
    /// authenticated identity of the connection.
    Chat {
        #[serde(default)]
        sender_id: Option<Uuid>,
        receiver_id: Uuid,
        #[serde(default)]
        conversation_id: Option<Uuid>,
        content: String,
        #[serde(default)]
        content_type: ContentKind,
        #[serde(default)]
        extra_data: Option<Value>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

impl ClientFrame {
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Frames sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerFrame {
    Pong {
        timestamp: i64,
    },

    /// Stringified user id -> online.
    PresenceResponse {
        status_map: BTreeMap<String, bool>,
    },

    /// A persisted chat message pushed to its recipient.
    Chat {
        message_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        conversation_id: Uuid,
        content: String,
        content_type: ContentKind,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra_data: Option<Value>,
    },

    /// The server is closing this session (superseded, logged out, idle).
    SessionClosed {
        reason: String,
    },

    Error {
        content: String,
    },
}

impl ServerFrame {
    pub fn chat(message: &Message) -> Self {
        Self::Chat {
            message_id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            conversation_id: message.conversation_id,
            content: message.content.clone(),
            content_type: message.content_kind,
            timestamp: message.created_at.timestamp_millis(),
            extra_data: message
                .extra_data
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
