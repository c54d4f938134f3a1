pub mod actor;
pub mod admission;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ErrorCode;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system clone this to push frames to a specific client;
/// the socket itself is only ever owned by the connection's writer task.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// WebSocket path the collaboration endpoint is mounted at.
pub const WS_PATH: &str = "/ws/team-collaboration";

/// Close codes sent alongside terminal `error` envelopes.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4001;
pub const CLOSE_SESSION_TAKEN: u16 = 4002;
pub const CLOSE_CONNECTION_ERROR: u16 = 1001;

/// Close code sent after an error that terminates the connection.
pub fn close_code(code: ErrorCode) -> u16 {
    match code {
        ErrorCode::AuthTimeout => CLOSE_AUTH_TIMEOUT,
        ErrorCode::SessionTaken => CLOSE_SESSION_TAKEN,
        _ => CLOSE_CONNECTION_ERROR,
    }
}

/// Opaque identifier issued to every transport at admission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_codes_map_to_their_close_codes() {
        assert_eq!(close_code(ErrorCode::AuthTimeout), 4001);
        assert_eq!(close_code(ErrorCode::SessionTaken), 4002);
        assert_eq!(close_code(ErrorCode::ConnectionError), 1001);
    }
}
