use axum::extract::ws::{CloseFrame, Message};

use crate::error::{CollabError, ErrorCode};
use crate::session::{Session, SessionRegistry};
use crate::ws::protocol::{Envelope, UserId};
use crate::ws::ConnectionSender;

/// Serialize an envelope and push it to one connection.
/// Returns false if serialization failed or the connection is gone.
pub fn send_envelope(tx: &ConnectionSender, envelope: &Envelope) -> bool {
    match envelope.to_text() {
        Ok(text) => tx.send(Message::Text(text.into())).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize envelope");
            false
        }
    }
}

/// Send an `error` envelope to one connection.
pub fn send_error(tx: &ConnectionSender, code: ErrorCode, message: &str) {
    send_envelope(tx, &Envelope::error(code, message));
}

/// Queue a close frame. The connection's writer stops after sending it.
pub fn close(tx: &ConnectionSender, code: u16, reason: &str) {
    let _ = tx.send(Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    })));
}

/// Fan an already-stamped envelope out to the members of a locked session.
///
/// Serializes once and hands each recipient the same frame. Members in
/// `exclude` and members whose writer has gone away are skipped; a failed
/// send is ignored and surfaces later through that connection's disconnect.
/// Returns the number of members the frame was queued for.
pub fn fan_out(
    session: &Session,
    envelope: &Envelope,
    exclude: &[UserId],
) -> Result<usize, CollabError> {
    let frame = Message::Text(envelope.to_text()?.into());

    let mut delivered = 0;
    for member in session.members() {
        if exclude.contains(&member.user_id) || !member.is_writable() {
            continue;
        }
        if member.sender.send(frame.clone()).is_ok() {
            delivered += 1;
        }
    }
    Ok(delivered)
}

/// Stamp `envelope` with the current time and broadcast it to a session.
/// A missing session is not an error; nothing is sent.
pub fn broadcast(
    registry: &SessionRegistry,
    session_id: &str,
    mut envelope: Envelope,
    exclude: &[UserId],
) -> usize {
    registry
        .with_session(session_id, |session| {
            envelope.stamp();
            fan_out(session, &envelope, exclude)
        })
        .map(|result| {
            result.unwrap_or_else(|e| {
                tracing::error!(session_id = %session_id, error = %e, "Broadcast failed");
                0
            })
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::buffer::{DEFAULT_ACTIVITY_CAPACITY, DEFAULT_CHAT_CAPACITY};
    use crate::session::registry::INITIAL_STATUS;
    use crate::session::SessionMember;
    use crate::ws::protocol::{ChatMessage, MessageBody};
    use crate::ws::ConnectionId;
    use chrono::Utc;
    use tokio::sync::mpsc;

    type Inbox = mpsc::UnboundedReceiver<Message>;

    fn join(registry: &SessionRegistry, session_id: &str, user_id: UserId) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.get_or_create(session_id).insert_member(SessionMember {
            user_id,
            display_name: format!("user{user_id}"),
            role: "member".into(),
            status: INITIAL_STATUS.into(),
            last_activity: Utc::now(),
            connection_id: ConnectionId::generate(),
            sender: tx,
        });
        rx
    }

    fn chat(content: &str) -> Envelope {
        Envelope::from_sender(
            MessageBody::Chat(ChatMessage {
                message_id: None,
                content: content.into(),
            }),
            "S1",
            1,
            "user1",
        )
    }

    fn drain(rx: &mut Inbox) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn excluded_members_get_nothing_and_others_get_one_copy() {
        let registry = SessionRegistry::new(DEFAULT_CHAT_CAPACITY, DEFAULT_ACTIVITY_CAPACITY);
        let mut inboxes: Vec<(UserId, Inbox)> =
            (1..=5).map(|id| (id, join(&registry, "S1", id))).collect();

        let sent = broadcast(&registry, "S1", chat("hello"), &[2, 4]);
        assert_eq!(sent, 3);

        let mut frames = Vec::new();
        for (id, rx) in inboxes.iter_mut() {
            let got = drain(rx);
            if *id == 2 || *id == 4 {
                assert!(got.is_empty(), "excluded member {id} received a frame");
            } else {
                assert_eq!(got.len(), 1, "member {id} should get exactly one copy");
                frames.push(got.into_iter().next().unwrap());
            }
        }
        // Serialized once: every recipient sees identical bytes.
        assert!(frames.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn closed_transports_are_skipped() {
        let registry = SessionRegistry::new(DEFAULT_CHAT_CAPACITY, DEFAULT_ACTIVITY_CAPACITY);
        let mut alive = join(&registry, "S1", 1);
        let dead = join(&registry, "S1", 2);
        drop(dead);

        assert_eq!(broadcast(&registry, "S1", chat("x"), &[]), 1);
        assert_eq!(drain(&mut alive).len(), 1);
    }

    #[test]
    fn broadcast_to_missing_session_is_a_no_op() {
        let registry = SessionRegistry::new(DEFAULT_CHAT_CAPACITY, DEFAULT_ACTIVITY_CAPACITY);
        assert_eq!(broadcast(&registry, "nowhere", chat("x"), &[]), 0);
    }

    #[test]
    fn broadcast_restamps_the_envelope() {
        let registry = SessionRegistry::new(DEFAULT_CHAT_CAPACITY, DEFAULT_ACTIVITY_CAPACITY);
        let mut rx = join(&registry, "S1", 1);

        let mut env = chat("late");
        env.timestamp = Utc::now() - chrono::Duration::hours(1);
        let authored = env.timestamp;
        broadcast(&registry, "S1", env, &[]);

        let frame = drain(&mut rx).pop().unwrap();
        let text = match frame {
            Message::Text(t) => t,
            other => panic!("expected text, got {other:?}"),
        };
        let parsed: Envelope = serde_json::from_str(text.as_str()).unwrap();
        assert!(parsed.timestamp > authored);
    }
}
