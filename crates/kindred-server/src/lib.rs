pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use kindred_api::auth::{AppState, AppStateInner};
use kindred_api::authority::{DbDirectory, JwtAuthority};
use kindred_db::Database;
use kindred_gateway::{
    HandshakeAuthenticator, HandshakeParams, MessageRouter, PresenceRegistry, UserDirectory,
    connection,
};

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    router: MessageRouter,
    auth: HandshakeAuthenticator,
    heartbeat: Duration,
}

/// Assemble the REST and WebSocket routes over one database. Returns the
/// presence registry too so the caller can run the idle sweep on it.
pub fn build_app(config: &Config, db: Arc<Database>) -> (Router, PresenceRegistry) {
    let jwt = JwtAuthority::new(&config.jwt_secret, config.token_ttl_days);
    let presence = PresenceRegistry::new();
    let app_state: AppState = Arc::new(AppStateInner::new(db.clone(), jwt.clone(), presence.clone()));

    let directory: Arc<dyn UserDirectory> = Arc::new(DbDirectory::new(db));

    let gateway = GatewayState {
        router: MessageRouter::new(
            presence.clone(),
            app_state.conversations.clone(),
            directory.clone(),
        ),
        auth: HandshakeAuthenticator::new(Arc::new(jwt), directory, config.handshake_timeout),
        heartbeat: config.heartbeat_interval,
    };

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(kindred_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    (app, presence)
}

/// Credentials arrive as query parameters. A refused handshake is a bare 401
/// and never reaches the presence registry.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<HandshakeParams>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.auth.validate(&params).await {
        Ok(user) => ws
            .on_upgrade(move |socket| {
                connection::run_session(socket, state.router, user.user_id, state.heartbeat)
            })
            .into_response(),
        Err(_) => StatusCode::UNAUTHORIZED.into_response(),
    }
}
