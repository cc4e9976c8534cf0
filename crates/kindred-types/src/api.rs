use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ContentKind, Conversation, MatchRecord, MatchStatus, Message};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Matches --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub id: Uuid,
    pub initiator_id: Uuid,
    pub target_id: Uuid,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&MatchRecord> for MatchResponse {
    fn from(record: &MatchRecord) -> Self {
        Self {
            id: record.id,
            initiator_id: record.initiator,
            target_id: record.target(),
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InterestResponse {
    pub matched: bool,
    #[serde(rename = "match")]
    pub record: MatchResponse,
    pub conversation_id: Option<Uuid>,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub target_user_id: Uuid,
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub target_user_id: Uuid,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ConversationResponse {
    /// Returns `None` if `viewer` is not a participant.
    pub fn for_viewer(conversation: &Conversation, viewer: Uuid) -> Option<Self> {
        Some(Self {
            id: conversation.id,
            target_user_id: conversation.pair.other(viewer)?,
            last_message: conversation.last_message.clone(),
            last_message_at: conversation.last_message_at,
            unread_count: conversation.unread_for(viewer)?,
            created_at: conversation.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub content_type: ContentKind,
    pub extra_data: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            content: m.content,
            content_type: m.content_kind,
            extra_data: m.extra_data,
            read: m.read,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadAckResponse {
    pub conversation_id: Uuid,
    pub messages_marked: usize,
}

// -- Presence --

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceStatsResponse {
    pub sessions: usize,
}
