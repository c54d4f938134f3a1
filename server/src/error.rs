//! Error taxonomy shared by the handshake, router and transport layers.
//!
//! Every failure that reaches a client is reported as an `error` envelope
//! carrying one of the [`ErrorCode`] strings. None of them are fatal to the
//! process; the worst outcome is that one connection is closed.

use thiserror::Error;

/// Wire error codes sent in `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidMessage,
    InvalidAuth,
    InvalidConnection,
    AuthTimeout,
    SessionTaken,
    NotAuthenticated,
    UnhandledMessageType,
    MessageProcessingError,
    ConnectionError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidMessage => "invalid_message",
            Self::InvalidAuth => "invalid_auth",
            Self::InvalidConnection => "invalid_connection",
            Self::AuthTimeout => "auth_timeout",
            Self::SessionTaken => "session_taken",
            Self::NotAuthenticated => "not_authenticated",
            Self::UnhandledMessageType => "unhandled_message_type",
            Self::MessageProcessingError => "message_processing_error",
            Self::ConnectionError => "connection_error",
        }
    }

    /// Whether the connection must be closed after reporting this error.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Self::AuthTimeout | Self::SessionTaken | Self::ConnectionError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol-level failure scoped to one connection.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct CollabError {
    pub code: ErrorCode,
    pub message: String,
}

impl CollabError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidMessage, message)
    }

    pub fn invalid_auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidAuth, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MessageProcessingError, message)
    }
}

impl From<serde_json::Error> for CollabError {
    fn from(e: serde_json::Error) -> Self {
        CollabError::processing(format!("serialization failed: {e}"))
    }
}

/// Errors raised by the persistence-backed collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_are_snake_case_and_distinct() {
        let codes = [
            ErrorCode::InvalidMessage,
            ErrorCode::InvalidAuth,
            ErrorCode::InvalidConnection,
            ErrorCode::AuthTimeout,
            ErrorCode::SessionTaken,
            ErrorCode::NotAuthenticated,
            ErrorCode::UnhandledMessageType,
            ErrorCode::MessageProcessingError,
            ErrorCode::ConnectionError,
        ];
        let mut strings: Vec<&str> = codes.iter().map(ErrorCode::as_str).collect();
        assert!(strings
            .iter()
            .all(|s| s.chars().all(|c| c.is_ascii_lowercase() || c == '_')));
        strings.sort();
        strings.dedup();
        assert_eq!(strings.len(), codes.len());
        assert_eq!(ErrorCode::SessionTaken.to_string(), "session_taken");
    }

    #[test]
    fn only_terminal_codes_close_the_connection() {
        assert!(ErrorCode::AuthTimeout.closes_connection());
        assert!(ErrorCode::SessionTaken.closes_connection());
        assert!(ErrorCode::ConnectionError.closes_connection());
        assert!(!ErrorCode::InvalidMessage.closes_connection());
        assert!(!ErrorCode::NotAuthenticated.closes_connection());
        assert!(!ErrorCode::UnhandledMessageType.closes_connection());
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = CollabError::invalid_auth("userId must be an integer");
        assert_eq!(err.to_string(), "invalid_auth: userId must be an integer");
    }
}
