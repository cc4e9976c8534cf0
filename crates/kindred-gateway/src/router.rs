use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use kindred_core::{ConversationRegistry, CoreError, MessageDraft};
use kindred_types::frames::{ClientFrame, ServerFrame};
use kindred_types::models::{ContentKind, Message};

use crate::handshake::UserDirectory;
use crate::presence::{PresenceRegistry, SessionHandle};

pub const MAX_CONTENT_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(&'static str),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FrameError {
    /// Text for the `ERROR` frame. Storage detail stays in the logs.
    fn client_message(&self) -> String {
        match self {
            Self::Core(CoreError::Storage(_)) | Self::Internal(_) => {
                "message could not be stored".to_string()
            }
            Self::Core(CoreError::NotParticipant { .. }) => {
                "not a participant of this conversation".to_string()
            }
            other => other.to_string(),
        }
    }
}

struct ChatRequest {
    sender_id: Option<Uuid>,
    receiver_id: Uuid,
    conversation_id: Option<Uuid>,
    content: String,
    content_type: ContentKind,
    extra_data: Option<Value>,
}

/// Per-frame dispatcher shared by every connection.
#[derive(Clone)]
pub struct MessageRouter {
    presence: PresenceRegistry,
    conversations: ConversationRegistry,
    directory: Arc<dyn UserDirectory>,
}

impl MessageRouter {
    pub fn new(
        presence: PresenceRegistry,
        conversations: ConversationRegistry,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            presence,
            conversations,
            directory,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Handle one text frame from `user_id`'s connection. Returns the reply
    /// for the sender, if any. Malformed frames are logged and dropped.
    pub async fn handle_inbound(
        &self,
        user_id: Uuid,
        session: &SessionHandle,
        text: &str,
    ) -> Option<ServerFrame> {
        let frame = match ClientFrame::decode(text).map_err(FrameError::from) {
            Ok(frame) => frame,
            Err(e) => {
                let raw: String = text.chars().take(200).collect();
                warn!(%user_id, "Discarding {} -- raw: {}", e, raw);
                return None;
            }
        };

        match frame {
            ClientFrame::Heartbeat { .. } => {
                session.touch();
                trace!(%user_id, "Heartbeat");
                Some(ServerFrame::Pong {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                })
            }

            ClientFrame::PresenceQuery { user_ids } => Some(ServerFrame::PresenceResponse {
                status_map: self.presence.presence_map(&user_ids),
            }),

            ClientFrame::Chat {
                sender_id,
                receiver_id,
                conversation_id,
                content,
                content_type,
                extra_data,
                ..
            } => {
                let request = ChatRequest {
                    sender_id,
                    receiver_id,
                    conversation_id,
                    content,
                    content_type,
                    extra_data,
                };
                match self.route_chat(user_id, request).await {
                    Ok(message) => Some(ServerFrame::chat(&message)),
                    Err(e) => {
                        match &e {
                            FrameError::Core(CoreError::Storage(_)) | FrameError::Internal(_) => {
                                error!(%user_id, "Chat send failed: {}", e)
                            }
                            _ => warn!(%user_id, "Chat rejected: {}", e),
                        }
                        Some(ServerFrame::error(e.client_message()))
                    }
                }
            }
        }
    }

    /// Persist the message and conversation update as one unit, then try live
    /// delivery. An offline recipient is not an error.
    async fn route_chat(&self, sender: Uuid, request: ChatRequest) -> Result<Message, FrameError> {
        if request.sender_id.is_some_and(|claimed| claimed != sender) {
            return Err(FrameError::Invalid("senderId does not match the authenticated user"));
        }
        if request.receiver_id == sender {
            return Err(FrameError::Invalid("cannot send a message to yourself"));
        }
        if request.content.trim().is_empty() {
            return Err(FrameError::Invalid("content must not be empty"));
        }
        if request.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(FrameError::Invalid("content exceeds 4000 characters"));
        }

        let receiver = request.receiver_id;
        // Unknown or disabled recipients never get a conversation row.
        match self.directory.exists(receiver).await {
            Ok(true) => {}
            Ok(false) => return Err(FrameError::Invalid("unknown recipient")),
            Err(e) => return Err(FrameError::Internal(e.to_string())),
        }

        let draft = MessageDraft {
            sender_id: sender,
            receiver_id: receiver,
            content: request.content,
            content_kind: request.content_type,
            extra_data: request.extra_data.map(|v| v.to_string()),
        };

        let conversations = self.conversations.clone();
        let conversation_id = request.conversation_id;
        let message = tokio::task::spawn_blocking(move || {
            let conversation_id = match conversation_id {
                Some(id) => id,
                None => conversations.get_or_create(sender, receiver)?.id,
            };
            conversations.record_message(conversation_id, draft)
        })
        .await
        .map_err(|e| FrameError::Internal(e.to_string()))??;

        if self.presence.send_to(receiver, ServerFrame::chat(&message)) {
            debug!(message_id = %message.id, %receiver, "Delivered live");
        } else {
            debug!(message_id = %message.id, %receiver, "Recipient offline, message stored");
        }
        Ok(message)
    }
}
