use axum::routing::{get, post};
use axum::Router;

use crate::session::api;
use crate::state::AppState;
use crate::ws::{handler as ws_handler, WS_PATH};

/// GET /health: liveness check.
async fn health() -> &'static str {
    "ok"
}

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/api/sessions", get(api::list_sessions))
        .route("/api/sessions/{session_id}", get(api::get_session))
        .route(
            "/api/sessions/{session_id}/meeting-reminders",
            post(api::send_meeting_reminder),
        );

    Router::new()
        .route("/health", get(health))
        .route(WS_PATH, get(ws_handler::ws_upgrade))
        .merge(session_routes)
        .with_state(state)
}
