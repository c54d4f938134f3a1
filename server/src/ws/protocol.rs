//! Wire format for the collaboration endpoint.
//!
//! Every frame is a UTF-8 JSON object with a `type` tag. Outbound frames are
//! [`Envelope`]s: a [`MessageBody`] flattened next to the common header
//! fields (`timestamp`, `sessionId`, `senderId`, `senderName`). Inbound frames
//! are classified by [`decode_frame`] into the authentication request or one of
//! the routable bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CollabError, ErrorCode};

pub type UserId = i64;

/// Legacy keepalive frames, answered without JSON parsing.
pub const PING_FRAME: &str = "ping";
pub const PONG_FRAME: &str = "pong";

/// Closed registry of message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Authenticate,
    Join,
    Leave,
    Chat,
    StatusUpdate,
    TaskAssigned,
    TaskUpdated,
    CommentAdded,
    UserActivity,
    MeetingReminder,
    Error,
    AuthRequired,
    AuthSuccess,
    SessionState,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Chat => "chat",
            Self::StatusUpdate => "status-update",
            Self::TaskAssigned => "task-assigned",
            Self::TaskUpdated => "task-updated",
            Self::CommentAdded => "comment-added",
            Self::UserActivity => "user-activity",
            Self::MeetingReminder => "meeting-reminder",
            Self::Error => "error",
            Self::AuthRequired => "auth-required",
            Self::AuthSuccess => "auth-success",
            Self::SessionState => "session-state",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "authenticate" => Some(Self::Authenticate),
            "join" => Some(Self::Join),
            "leave" => Some(Self::Leave),
            "chat" => Some(Self::Chat),
            "status-update" => Some(Self::StatusUpdate),
            "task-assigned" => Some(Self::TaskAssigned),
            "task-updated" => Some(Self::TaskUpdated),
            "comment-added" => Some(Self::CommentAdded),
            "user-activity" => Some(Self::UserActivity),
            "meeting-reminder" => Some(Self::MeetingReminder),
            "error" => Some(Self::Error),
            "auth-required" => Some(Self::AuthRequired),
            "auth-success" => Some(Self::AuthSuccess),
            "session-state" => Some(Self::SessionState),
            _ => None,
        }
    }

    /// Types a client may send once authenticated.
    pub fn is_client_routable(&self) -> bool {
        matches!(
            self,
            Self::Chat
                | Self::StatusUpdate
                | Self::TaskAssigned
                | Self::TaskUpdated
                | Self::CommentAdded
                | Self::UserActivity
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Type-specific payloads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinNotice {
    pub user_id: UserId,
    pub user_name: String,
    pub user_role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveNotice {
    pub user_id: UserId,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssigned {
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    pub assignee_id: UserId,
    /// Task details; opaque to this layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdated {
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentAdded {
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<i64>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingReminder {
    pub meeting_id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: String,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequired {
    pub connection_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccess {
    pub user_id: UserId,
    pub user_name: String,
}

/// One entry of `session-state.activeUsers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub user_id: UserId,
    pub user_name: String,
    pub user_role: String,
    pub status: String,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub active_users: Vec<MemberInfo>,
    pub recent_messages: Vec<Envelope>,
    pub recent_activities: Vec<Envelope>,
}

/// Tagged union of every frame body the server sends or routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessageBody {
    Join(JoinNotice),
    Leave(LeaveNotice),
    Chat(ChatMessage),
    StatusUpdate(StatusUpdate),
    TaskAssigned(TaskAssigned),
    TaskUpdated(TaskUpdated),
    CommentAdded(CommentAdded),
    UserActivity(UserActivity),
    MeetingReminder(MeetingReminder),
    Error(ErrorBody),
    AuthRequired(AuthRequired),
    AuthSuccess(AuthSuccess),
    SessionState(SessionState),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Join(_) => MessageType::Join,
            Self::Leave(_) => MessageType::Leave,
            Self::Chat(_) => MessageType::Chat,
            Self::StatusUpdate(_) => MessageType::StatusUpdate,
            Self::TaskAssigned(_) => MessageType::TaskAssigned,
            Self::TaskUpdated(_) => MessageType::TaskUpdated,
            Self::CommentAdded(_) => MessageType::CommentAdded,
            Self::UserActivity(_) => MessageType::UserActivity,
            Self::MeetingReminder(_) => MessageType::MeetingReminder,
            Self::Error(_) => MessageType::Error,
            Self::AuthRequired(_) => MessageType::AuthRequired,
            Self::AuthSuccess(_) => MessageType::AuthSuccess,
            Self::SessionState(_) => MessageType::SessionState,
        }
    }
}

/// A complete outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

impl Envelope {
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            timestamp: Utc::now(),
            session_id: None,
            sender_id: None,
            sender_name: None,
        }
    }

    /// Attach the session and sender header fields.
    pub fn from_sender(
        body: MessageBody,
        session_id: &str,
        sender_id: UserId,
        sender_name: &str,
    ) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            sender_id: Some(sender_id),
            sender_name: Some(sender_name.to_string()),
            ..Self::new(body)
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(MessageBody::Error(ErrorBody {
            error_code: code.as_str().to_string(),
            error_message: message.into(),
        }))
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// Reassign the timestamp to now. Called at the moment of broadcast.
    pub fn stamp(&mut self) {
        self.timestamp = Utc::now();
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&CollabError> for Envelope {
    fn from(err: &CollabError) -> Self {
        Envelope::error(err.code, err.message.clone())
    }
}

/// The client's `authenticate` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    pub connection_id: String,
    pub session_id: String,
    pub user_id: UserId,
    pub user_name: String,
    pub user_role: String,
}

impl AuthenticateRequest {
    /// Validate identity fields field-by-field so the client learns which one
    /// is wrong.
    pub fn from_value(value: &Value) -> Result<Self, CollabError> {
        let connection_id = required_str(value, "connectionId")?;
        let session_id = required_str(value, "sessionId")?;
        let user_id = value
            .get("userId")
            .and_then(Value::as_i64)
            .ok_or_else(|| CollabError::invalid_auth("userId must be an integer"))?;
        let user_name = required_str(value, "userName")?;
        let user_role = required_str(value, "userRole")?;

        Ok(Self {
            connection_id,
            session_id,
            user_id,
            user_name,
            user_role,
        })
    }
}

fn required_str(value: &Value, field: &str) -> Result<String, CollabError> {
    match value.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        Some(_) => Err(CollabError::invalid_auth(format!("{field} must not be empty"))),
        None => Err(CollabError::invalid_auth(format!(
            "{field} is required and must be a string"
        ))),
    }
}

/// A classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping,
    Authenticate(AuthenticateRequest),
    Routable(MessageBody),
}

/// Parse and classify one inbound text frame.
///
/// Malformed JSON and bodies that don't match their type yield
/// `invalid_message`; unknown or server-only types yield
/// `unhandled_message_type`; a bad `authenticate` yields `invalid_auth`.
pub fn decode_frame(text: &str) -> Result<Inbound, CollabError> {
    if text == PING_FRAME {
        return Ok(Inbound::Ping);
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| CollabError::invalid_message(format!("malformed JSON: {e}")))?;

    if !value.is_object() {
        return Err(CollabError::invalid_message("frame must be a JSON object"));
    }

    let type_tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CollabError::invalid_message("missing string field `type`"))?;

    let message_type = MessageType::from_str(type_tag).ok_or_else(|| {
        CollabError::new(
            ErrorCode::UnhandledMessageType,
            format!("unknown message type: {type_tag}"),
        )
    })?;

    if message_type == MessageType::Authenticate {
        return AuthenticateRequest::from_value(&value).map(Inbound::Authenticate);
    }

    if !message_type.is_client_routable() {
        return Err(CollabError::new(
            ErrorCode::UnhandledMessageType,
            format!("message type not accepted from clients: {message_type}"),
        ));
    }

    serde_json::from_value::<MessageBody>(value)
        .map(Inbound::Routable)
        .map_err(|e| CollabError::invalid_message(format!("invalid {message_type} body: {e}")))
}

/// The `type` tag of a JSON object frame, without validating the rest of it.
pub fn frame_type(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_is_not_parsed_as_json() {
        assert_eq!(decode_frame("ping").unwrap(), Inbound::Ping);
    }

    #[test]
    fn chat_frame_decodes_into_routable_body() {
        let frame = json!({ "type": "chat", "content": "hello", "timestamp": "ignored" });
        match decode_frame(&frame.to_string()).unwrap() {
            Inbound::Routable(MessageBody::Chat(chat)) => {
                assert_eq!(chat.content, "hello");
                assert!(chat.message_id.is_none());
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_invalid_message() {
        for frame in ["{not json", "[1,2]", r#"{"content":"x"}"#, r#"{"type":7}"#] {
            let err = decode_frame(frame).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidMessage, "frame {frame}");
        }
    }

    #[test]
    fn known_type_with_wrong_fields_is_invalid_message() {
        let err = decode_frame(r#"{"type":"task-assigned","taskId":"abc"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidMessage);
    }

    #[test]
    fn frame_type_reads_the_tag_without_validating_the_body() {
        assert_eq!(frame_type(r#"{"type":"chat"}"#).as_deref(), Some("chat"));
        assert_eq!(
            frame_type(r#"{"type":"status-update","status":5}"#).as_deref(),
            Some("status-update")
        );
        assert_eq!(frame_type("{not json"), None);
        assert_eq!(frame_type(r#"{"type":7}"#), None);
        assert_eq!(frame_type("ping"), None);
    }

    #[test]
    fn unknown_and_server_only_types_are_unhandled() {
        for frame in [
            r#"{"type":"dance"}"#,
            r#"{"type":"session-state","activeUsers":[]}"#,
            r#"{"type":"meeting-reminder","meetingId":1,"title":"x"}"#,
        ] {
            let err = decode_frame(frame).unwrap_err();
            assert_eq!(err.code, ErrorCode::UnhandledMessageType, "frame {frame}");
        }
    }

    #[test]
    fn authenticate_requires_integer_user_id() {
        let frame = json!({
            "type": "authenticate",
            "connectionId": "c1",
            "sessionId": "S1",
            "userId": "42",
            "userName": "Ada",
            "userRole": "member",
        });
        let err = decode_frame(&frame.to_string()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAuth);
        assert!(err.message.contains("userId"));
    }

    #[test]
    fn authenticate_rejects_missing_and_empty_fields() {
        let missing = json!({ "type": "authenticate", "connectionId": "c1", "userId": 1 });
        assert_eq!(
            decode_frame(&missing.to_string()).unwrap_err().code,
            ErrorCode::InvalidAuth
        );

        let empty = json!({
            "type": "authenticate",
            "connectionId": "c1",
            "sessionId": "  ",
            "userId": 1,
            "userName": "Ada",
            "userRole": "member",
        });
        let err = decode_frame(&empty.to_string()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAuth);
        assert!(err.message.contains("sessionId"));
    }

    #[test]
    fn authenticate_decodes_all_identity_fields() {
        let frame = json!({
            "type": "authenticate",
            "connectionId": "c1",
            "sessionId": "S1",
            "userId": 42,
            "userName": "Ada",
            "userRole": "lead",
        });
        let req = match decode_frame(&frame.to_string()).unwrap() {
            Inbound::Authenticate(req) => req,
            other => panic!("expected authenticate, got {other:?}"),
        };
        assert_eq!(req.connection_id, "c1");
        assert_eq!(req.session_id, "S1");
        assert_eq!(req.user_id, 42);
        assert_eq!(req.user_name, "Ada");
        assert_eq!(req.user_role, "lead");
    }

    #[test]
    fn envelope_serializes_with_camel_case_header() {
        let env = Envelope::from_sender(
            MessageBody::Chat(ChatMessage {
                message_id: Some("m1".into()),
                content: "hi".into(),
            }),
            "S1",
            7,
            "Ada",
        );
        let value: Value = serde_json::from_str(&env.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["content"], "hi");
        assert_eq!(value["messageId"], "m1");
        assert_eq!(value["sessionId"], "S1");
        assert_eq!(value["senderId"], 7);
        assert_eq!(value["senderName"], "Ada");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn error_envelope_omits_sender_fields() {
        let env = Envelope::error(ErrorCode::NotAuthenticated, "authenticate first");
        let value: Value = serde_json::from_str(&env.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["errorCode"], "not_authenticated");
        assert_eq!(value["errorMessage"], "authenticate first");
        assert!(value.get("senderId").is_none());
    }

    #[test]
    fn session_state_parses_back_with_nested_envelopes() {
        let chat = Envelope::from_sender(
            MessageBody::Chat(ChatMessage {
                message_id: None,
                content: "earlier".into(),
            }),
            "S1",
            1,
            "Ada",
        );
        let state = Envelope::new(MessageBody::SessionState(SessionState {
            active_users: vec![MemberInfo {
                user_id: 1,
                user_name: "Ada".into(),
                user_role: "lead".into(),
                status: "online".into(),
                last_activity: Utc::now(),
            }],
            recent_messages: vec![chat.clone()],
            recent_activities: vec![],
        }));

        let parsed: Envelope = serde_json::from_str(&state.to_text().unwrap()).unwrap();
        match parsed.body {
            MessageBody::SessionState(s) => {
                assert_eq!(s.active_users.len(), 1);
                assert_eq!(s.recent_messages, vec![chat]);
                assert!(s.recent_activities.is_empty());
            }
            other => panic!("expected session-state, got {other:?}"),
        }
    }

    #[test]
    fn every_type_tag_round_trips() {
        let all = [
            MessageType::Authenticate,
            MessageType::Join,
            MessageType::Leave,
            MessageType::Chat,
            MessageType::StatusUpdate,
            MessageType::TaskAssigned,
            MessageType::TaskUpdated,
            MessageType::CommentAdded,
            MessageType::UserActivity,
            MessageType::MeetingReminder,
            MessageType::Error,
            MessageType::AuthRequired,
            MessageType::AuthSuccess,
            MessageType::SessionState,
        ];
        for t in all {
            assert_eq!(MessageType::from_str(t.as_str()), Some(t));
        }
    }
}
