use axum::{Json, extract::State};

use kindred_types::api::PresenceStatsResponse;

use crate::auth::AppState;

pub async fn stats(State(state): State<AppState>) -> Json<PresenceStatsResponse> {
    Json(PresenceStatsResponse {
        sessions: state.presence.session_count(),
    })
}
