use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use kindred_core::InterestOutcome;
use kindred_types::api::{Claims, InterestResponse, MatchResponse};
use kindred_types::models::{MatchRecord, MatchStatus};

use crate::auth::AppState;
use crate::error::blocking;

#[derive(Debug, Deserialize)]
pub struct MatchListQuery {
    pub status: Option<MatchStatus>,
}

fn to_responses(records: Vec<MatchRecord>) -> Json<Vec<MatchResponse>> {
    Json(records.iter().map(MatchResponse::from).collect())
}

/// Reject targets that are unknown or disabled before touching match state.
async fn ensure_active(state: &AppState, user_id: Uuid) -> Result<(), StatusCode> {
    let db = state.db.clone();
    let active = tokio::task::spawn_blocking(move || db.is_active_user(user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if active { Ok(()) } else { Err(StatusCode::NOT_FOUND) }
}

pub async fn express_interest(
    State(state): State<AppState>,
    Path(target): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<InterestResponse>, StatusCode> {
    ensure_active(&state, target).await?;

    let engine = state.clone();
    let outcome = blocking(move || engine.matches.express_interest(claims.sub, target)).await?;

    let conversation_id = match &outcome {
        InterestOutcome::Matched { conversation, .. } => Some(conversation.id),
        InterestOutcome::Pending(_) => None,
    };
    Ok(Json(InterestResponse {
        matched: outcome.is_matched(),
        record: MatchResponse::from(outcome.record()),
        conversation_id,
    }))
}

pub async fn dissolve(
    State(state): State<AppState>,
    Path(other): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MatchResponse>, StatusCode> {
    let engine = state.clone();
    let record = blocking(move || engine.matches.dissolve(claims.sub, other)).await?;
    Ok(Json(MatchResponse::from(&record)))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(other): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MatchResponse>, StatusCode> {
    ensure_active(&state, other).await?;

    let engine = state.clone();
    let record = blocking(move || engine.matches.reject(claims.sub, other)).await?;
    Ok(Json(MatchResponse::from(&record)))
}

pub async fn list_matches(
    State(state): State<AppState>,
    Query(query): Query<MatchListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MatchResponse>>, StatusCode> {
    let engine = state.clone();
    let records = blocking(move || engine.matches.list(claims.sub, query.status)).await?;
    Ok(to_responses(records))
}

pub async fn interest_sent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MatchResponse>>, StatusCode> {
    let engine = state.clone();
    let records = blocking(move || engine.matches.interest_sent(claims.sub)).await?;
    Ok(to_responses(records))
}

pub async fn interest_received(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MatchResponse>>, StatusCode> {
    let engine = state.clone();
    let records = blocking(move || engine.matches.interest_received(claims.sub)).await?;
    Ok(to_responses(records))
}

/// Current (most recent) record between the caller and another user.
pub async fn match_with(
    State(state): State<AppState>,
    Path(other): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MatchResponse>, StatusCode> {
    let engine = state.clone();
    let record = blocking(move || engine.matches.between(claims.sub, other))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(MatchResponse::from(&record)))
}
