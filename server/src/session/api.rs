//! Session introspection and server-originated messages over REST.
//!
//! GET endpoints read the live registry; the meeting-reminder endpoint is
//! the entry point for schedulers that want to push a reminder into a
//! running session.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::state::AppState;
use crate::ws::protocol::{MeetingReminder, MemberInfo};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummaryResponse {
    pub session_id: String,
    pub member_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailResponse {
    pub session_id: String,
    pub members: Vec<MemberInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderResponse {
    pub delivered: usize,
}

/// GET /api/sessions -> active sessions with their member counts, ordered by id.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummaryResponse>> {
    let sessions: Vec<SessionSummaryResponse> = state
        .service
        .registry
        .summaries()
        .into_iter()
        .map(|s| SessionSummaryResponse {
            session_id: s.session_id,
            member_count: s.member_count,
        })
        .collect();

    Json(sessions)
}

/// GET /api/sessions/{session_id} -> members of one session, 404 if it isn't live.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetailResponse>, StatusCode> {
    let members = state
        .service
        .registry
        .with_session(&session_id, |session| session.member_infos())
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(SessionDetailResponse {
        session_id,
        members,
    }))
}

/// POST /api/sessions/{session_id}/meeting-reminders
/// Body: { "meetingId": 1, "title": "...", "startsAt": "RFC 3339"? }
pub async fn send_meeting_reminder(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<MeetingReminder>,
) -> Result<Json<ReminderResponse>, StatusCode> {
    let meeting_id = body.meeting_id;
    let delivered = state
        .service
        .send_meeting_reminder(&session_id, body)
        .ok_or(StatusCode::NOT_FOUND)?;

    tracing::info!(
        session_id = %session_id,
        meeting_id,
        delivered,
        "Meeting reminder broadcast"
    );

    Ok(Json(ReminderResponse { delivered }))
}
