//! Authentication handshake: promotes a pending connection to a session member.
//!
//! 1. Client receives `auth-required{connectionId}` on connect
//! 2. Client sends `authenticate` with its identity and the echoed id
//! 3. Server replies `auth-success`, then `session-state` to the joiner only,
//!    then broadcasts `join` to everyone else in the session

use chrono::Utc;
use serde_json::json;

use crate::collaborators::AuditEvent;
use crate::error::{CollabError, ErrorCode};
use crate::service::CollabService;
use crate::session::registry::INITIAL_STATUS;
use crate::session::{MemberKey, SessionMember};
use crate::ws::broadcast::{close, fan_out, send_envelope, send_error};
use crate::ws::protocol::{
    AuthSuccess, AuthenticateRequest, Envelope, JoinNotice, MessageBody, MessageType, SessionState,
};
use crate::ws::{ConnectionId, CLOSE_SESSION_TAKEN};

/// Run the handshake for the connection identified by `own_id`.
///
/// Identity fields have already been validated by the decoder. On error the
/// connection stays pending unless the error code is terminal
/// (`auth_timeout`).
pub async fn authenticate(
    service: &CollabService,
    own_id: &ConnectionId,
    req: AuthenticateRequest,
) -> Result<MemberKey, CollabError> {
    let claimed_id = ConnectionId(req.connection_id.clone());
    if &claimed_id != own_id || !service.admission.is_pending(own_id) {
        return Err(CollabError::new(
            ErrorCode::InvalidConnection,
            format!("connection {} is not pending authentication", req.connection_id),
        ));
    }

    if let Some(user) = service.lookup_user(req.user_id).await {
        tracing::debug!(
            user_id = user.id,
            stored_name = %user.display_name,
            "User resolved"
        );
    }

    // Resolves the deadline; from here on the connection is ours.
    let pending = service.admission.claim(own_id)?;

    let member = SessionMember {
        user_id: req.user_id,
        display_name: req.user_name.clone(),
        role: req.user_role.clone(),
        status: INITIAL_STATUS.to_string(),
        last_activity: Utc::now(),
        connection_id: pending.connection_id.clone(),
        sender: pending.sender.clone(),
    };

    {
        let mut session = service.registry.get_or_create(&req.session_id);

        if let Some(evicted) = session.insert_member(member) {
            tracing::info!(
                session_id = %req.session_id,
                user_id = req.user_id,
                evicted_connection = %evicted.connection_id,
                "Evicting older connection for same identity"
            );
            send_error(
                &evicted.sender,
                ErrorCode::SessionTaken,
                "Another connection authenticated as this user in this session",
            );
            close(&evicted.sender, CLOSE_SESSION_TAKEN, "Session taken");
        }

        send_envelope(
            &pending.sender,
            &Envelope::from_sender(
                MessageBody::AuthSuccess(AuthSuccess {
                    user_id: req.user_id,
                    user_name: req.user_name.clone(),
                }),
                &req.session_id,
                req.user_id,
                &req.user_name,
            ),
        );

        let history = session.history();
        let mut state = Envelope::new(MessageBody::SessionState(SessionState {
            active_users: session.member_infos(),
            recent_messages: history.messages,
            recent_activities: history.activities,
        }));
        state.session_id = Some(req.session_id.clone());
        send_envelope(&pending.sender, &state);

        let join = Envelope::from_sender(
            MessageBody::Join(JoinNotice {
                user_id: req.user_id,
                user_name: req.user_name.clone(),
                user_role: req.user_role.clone(),
            }),
            &req.session_id,
            req.user_id,
            &req.user_name,
        );
        fan_out(&session, &join, &[req.user_id])?;

        tracing::info!(
            session_id = %req.session_id,
            user_id = req.user_id,
            connection_id = %own_id,
            members = session.len(),
            "Member joined session"
        );
    }

    service
        .record(AuditEvent {
            session_id: req.session_id.clone(),
            user_id: req.user_id,
            kind: MessageType::Join.as_str().to_string(),
            payload: json!({ "userName": req.user_name, "userRole": req.user_role }),
            recorded_at: Utc::now(),
        })
        .await;

    Ok(MemberKey {
        session_id: req.session_id,
        user_id: req.user_id,
        user_name: req.user_name,
        connection_id: own_id.clone(),
    })
}
