//! API routes

pub mod health;
pub mod presence;
pub mod sessions;

use axum::{
    routing::{get, post},
    Router,
};

use crate::{state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Session sockets, one per (session, participant, role)
    let websocket_routes = Router::new()
        .route("/ws/chat/:session_id/:participant_id/:role", get(ws_handler));

    let api_v1_routes = Router::new()
        // Sessions
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/:session_id", get(sessions::get_session))
        .route(
            "/sessions/:session_id/messages",
            get(sessions::list_messages).post(sessions::send_message),
        )
        .route("/sessions/:session_id/close", post(sessions::close_session))
        .route(
            "/sessions/:session_id/connection-status",
            get(sessions::connection_status),
        )
        // Agent presence
        .route("/agents/heartbeat", post(presence::heartbeat))
        .route("/agents/offline", post(presence::set_offline))
        .route("/agents/presence", get(presence::list_presence));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api/v1", api_v1_routes)
        .with_state(state)
}
