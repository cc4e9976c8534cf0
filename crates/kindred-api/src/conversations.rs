use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use kindred_core::CoreError;
use kindred_types::api::{
    Claims, ConversationResponse, CreateConversationRequest, MessageResponse, ReadAckResponse,
};

use crate::auth::AppState;
use crate::error::blocking;

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct ConversationListQuery {
    #[serde(default = "default_conversation_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_conversation_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_message_limit")]
    pub limit: u32,
    /// Cursor: pass the id of the oldest message of the previous page to
    /// fetch older messages.
    pub before: Option<Uuid>,
}

fn default_message_limit() -> u32 {
    50
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ConversationListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationResponse>>, StatusCode> {
    let user_id = claims.sub;
    let limit = query.limit.clamp(1, MAX_PAGE);
    let registry = state.clone();
    let conversations = blocking(move || {
        registry
            .conversations
            .list_for_user(user_id, limit, query.offset)
    })
    .await?;

    Ok(Json(
        conversations
            .iter()
            .filter_map(|c| ConversationResponse::for_viewer(c, user_id))
            .collect(),
    ))
}

/// Get or create the conversation with another user.
pub async fn open_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let target = req.target_user_id;
    let registry = state.clone();
    let conversation = blocking(move || {
        if !registry.db.is_active_user(target)? {
            return Err(CoreError::NotFound("user"));
        }
        registry.conversations.get_or_create(user_id, target)
    })
    .await?;

    let body = ConversationResponse::for_viewer(&conversation, user_id)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(body))
}

/// Message history, newest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, StatusCode> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let registry = state.clone();
    let messages = blocking(move || {
        registry
            .conversations
            .history(conversation_id, claims.sub, query.before, limit)
    })
    .await?;

    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}

/// Reset the caller's unread counter and mark their incoming messages read.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReadAckResponse>, StatusCode> {
    let registry = state.clone();
    let receipt = blocking(move || {
        registry
            .conversations
            .acknowledge_read(conversation_id, claims.sub)
    })
    .await?;

    Ok(Json(ReadAckResponse {
        conversation_id,
        messages_marked: receipt.messages_marked,
    }))
}
