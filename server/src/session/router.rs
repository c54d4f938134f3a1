//! Dispatch of authenticated inbound messages, and disconnect cleanup.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::collaborators::{
    AuditEvent, CATEGORY_COMMENT_ADDED, CATEGORY_TASK_ASSIGNED, CATEGORY_TASK_UPDATED,
};
use crate::error::{CollabError, ErrorCode};
use crate::service::CollabService;
use crate::session::MemberKey;
use crate::ws::broadcast::{broadcast, fan_out};
use crate::ws::protocol::{
    Envelope, LeaveNotice, MessageBody, MessageType, UserActivity, UserId,
};

/// Maximum chat message length (chars).
pub const MAX_CHAT_LENGTH: usize = 4000;

/// Which history sequence a routed message is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum History {
    None,
    Chat,
    Activity,
}

/// Route one message from an authenticated member.
pub async fn dispatch(
    service: &CollabService,
    member: &MemberKey,
    body: MessageBody,
) -> Result<(), CollabError> {
    if !service
        .registry
        .is_current(&member.session_id, member.user_id, &member.connection_id)
    {
        return Err(CollabError::new(
            ErrorCode::SessionTaken,
            "This connection is no longer a member of the session",
        ));
    }
    service.registry.touch(&member.session_id, member.user_id);

    let message_type = body.message_type();
    match body {
        MessageBody::Chat(mut chat) => {
            let length = chat.content.chars().count();
            if chat.content.trim().is_empty() {
                return Err(CollabError::invalid_message("chat content must not be empty"));
            }
            if length > MAX_CHAT_LENGTH {
                return Err(CollabError::invalid_message(format!(
                    "chat content exceeds {MAX_CHAT_LENGTH} characters"
                )));
            }
            if chat.message_id.is_none() {
                chat.message_id = Some(Uuid::now_v7().to_string());
            }
            let envelope = publish(service, member, MessageBody::Chat(chat), History::Chat, None)?;
            audit(service, member, &envelope).await;
        }
        MessageBody::StatusUpdate(update) => {
            service
                .registry
                .set_status(&member.session_id, member.user_id, &update.status);
            publish(service, member, MessageBody::StatusUpdate(update), History::None, None)?;
        }
        MessageBody::TaskAssigned(task) => {
            let recipient = Some(task.assignee_id);
            let body = MessageBody::TaskAssigned(task);
            let activity = synthesize_activity(member, &body)?;
            let envelope = publish(service, member, body, History::None, Some(activity.clone()))?;
            audit(service, member, &activity).await;
            notify(service, recipient, CATEGORY_TASK_ASSIGNED, &envelope).await?;
        }
        MessageBody::TaskUpdated(task) => {
            let recipient = task.assignee_id;
            let body = MessageBody::TaskUpdated(task);
            let activity = synthesize_activity(member, &body)?;
            let envelope = publish(service, member, body, History::None, Some(activity.clone()))?;
            audit(service, member, &activity).await;
            notify(service, recipient, CATEGORY_TASK_UPDATED, &envelope).await?;
        }
        MessageBody::CommentAdded(comment) => {
            let recipient = comment.recipient_id;
            let body = MessageBody::CommentAdded(comment);
            let activity = synthesize_activity(member, &body)?;
            let envelope = publish(service, member, body, History::None, Some(activity.clone()))?;
            audit(service, member, &activity).await;
            notify(service, recipient, CATEGORY_COMMENT_ADDED, &envelope).await?;
        }
        MessageBody::UserActivity(activity) => {
            let envelope = publish(
                service,
                member,
                MessageBody::UserActivity(activity),
                History::Activity,
                None,
            )?;
            audit(service, member, &envelope).await;
        }
        MessageBody::Join(_)
        | MessageBody::Leave(_)
        | MessageBody::MeetingReminder(_)
        | MessageBody::Error(_)
        | MessageBody::AuthRequired(_)
        | MessageBody::AuthSuccess(_)
        | MessageBody::SessionState(_) => {
            return Err(CollabError::new(
                ErrorCode::UnhandledMessageType,
                format!("message type not accepted from clients: {message_type}"),
            ));
        }
    }

    tracing::debug!(
        session_id = %member.session_id,
        user_id = member.user_id,
        message_type = %message_type,
        "Message routed"
    );
    Ok(())
}

/// Stamp, record in history and broadcast, all under the session lock so the
/// history order matches the order members receive frames in.
fn publish(
    service: &CollabService,
    member: &MemberKey,
    body: MessageBody,
    history: History,
    activity: Option<Envelope>,
) -> Result<Envelope, CollabError> {
    let mut envelope =
        Envelope::from_sender(body, &member.session_id, member.user_id, &member.user_name);

    service
        .registry
        .with_session(&member.session_id, |session| {
            envelope.stamp();
            match history {
                History::Chat => session.buffer.append_chat(envelope.clone()),
                History::Activity => session.buffer.append_activity(envelope.clone()),
                History::None => {}
            }
            if let Some(mut activity) = activity {
                activity.timestamp = envelope.timestamp;
                session.buffer.append_activity(activity);
            }
            fan_out(session, &envelope, &[])
        })
        .ok_or_else(|| {
            CollabError::new(ErrorCode::SessionTaken, "Session no longer exists")
        })??;

    Ok(envelope)
}

/// Build the `user-activity` record kept for task and comment events.
fn synthesize_activity(member: &MemberKey, body: &MessageBody) -> Result<Envelope, CollabError> {
    let details = serde_json::to_value(body)?;
    Ok(Envelope::from_sender(
        MessageBody::UserActivity(UserActivity {
            action: body.message_type().as_str().to_string(),
            details: Some(details),
        }),
        &member.session_id,
        member.user_id,
        &member.user_name,
    ))
}

async fn audit(service: &CollabService, member: &MemberKey, envelope: &Envelope) {
    let payload = serde_json::to_value(&envelope.body).unwrap_or(Value::Null);
    service
        .record(AuditEvent {
            session_id: member.session_id.clone(),
            user_id: member.user_id,
            kind: envelope.message_type().as_str().to_string(),
            payload,
            recorded_at: envelope.timestamp,
        })
        .await;
}

async fn notify(
    service: &CollabService,
    recipient: Option<UserId>,
    category: &str,
    envelope: &Envelope,
) -> Result<(), CollabError> {
    let Some(user_id) = recipient else {
        return Ok(());
    };
    let payload = serde_json::to_value(envelope)?;
    service.notify(user_id, category, payload).await;
    Ok(())
}

/// Tear down an authenticated connection's membership.
///
/// Removes the member only if this connection is still the one bound to the
/// identity. If others remain, they get a `leave`; if the session emptied,
/// its history is already gone with it.
pub async fn disconnect(service: &CollabService, member: &MemberKey) {
    let Some(removal) = service.registry.remove_connection(
        &member.session_id,
        member.user_id,
        &member.connection_id,
    ) else {
        tracing::debug!(
            session_id = %member.session_id,
            user_id = member.user_id,
            connection_id = %member.connection_id,
            "Disconnect of superseded connection, nothing to remove"
        );
        return;
    };

    if !removal.session_empty {
        let leave = Envelope::from_sender(
            MessageBody::Leave(LeaveNotice {
                user_id: member.user_id,
                user_name: removal.member.display_name.clone(),
            }),
            &member.session_id,
            member.user_id,
            &removal.member.display_name,
        );
        broadcast(&service.registry, &member.session_id, leave, &[]);
    }

    tracing::info!(
        session_id = %member.session_id,
        user_id = member.user_id,
        session_closed = removal.session_empty,
        "Member left session"
    );

    service
        .record(AuditEvent {
            session_id: member.session_id.clone(),
            user_id: member.user_id,
            kind: MessageType::Leave.as_str().to_string(),
            payload: json!({ "userName": removal.member.display_name }),
            recorded_at: Utc::now(),
        })
        .await;
}
