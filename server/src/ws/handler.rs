use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws/team-collaboration
/// WebSocket upgrade endpoint. Identity is established in-band by the
/// `authenticate` handshake, so every upgrade is accepted and handed to an
/// actor that starts in the pending state.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    tracing::debug!("WebSocket upgrade requested");
    ws.on_upgrade(move |socket| actor::run_connection(socket, state.service))
}
