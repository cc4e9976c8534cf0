//! REST surface of Kindred: accounts, match actions and conversation reads.

pub mod auth;
pub mod authority;
pub mod conversations;
pub mod error;
pub mod matches;
pub mod middleware;
pub mod presence;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use auth::AppState;

/// All REST routes. The WebSocket route is added by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/matches", get(matches::list_matches))
        .route("/matches/sent", get(matches::interest_sent))
        .route("/matches/received", get(matches::interest_received))
        .route("/matches/{user_id}", get(matches::match_with))
        .route("/matches/{user_id}/interest", post(matches::express_interest))
        .route("/matches/{user_id}/dissolve", post(matches::dissolve))
        .route("/matches/{user_id}/reject", post(matches::reject))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::open_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(conversations::mark_read),
        )
        .route("/presence/stats", get(presence::stats))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
