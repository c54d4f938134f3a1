use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, timeout};

use crate::error::{CollabError, ErrorCode};
use crate::service::CollabService;
use crate::session::{handshake, router, MemberKey};
use crate::ws::broadcast::{close, send_envelope, send_error};
use crate::ws::protocol::{
    decode_frame, frame_type, AuthRequired, Envelope, Inbound, MessageBody, MessageType, PONG_FRAME,
};
use crate::ws::{close_code, ConnectionId, ConnectionSender, CLOSE_AUTH_TIMEOUT};

/// How long to wait for queued frames (e.g. a final close) to flush on teardown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Authentication state of one connection.
#[derive(Debug)]
enum AuthState {
    PendingAuth,
    Authenticated(MemberKey),
    Closed,
}

impl AuthState {
    fn is_pending(&self) -> bool {
        matches!(self, AuthState::PendingAuth)
    }
}

/// Run the actor-per-connection pattern for one collaboration WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from an mpsc channel, and
///   stops after forwarding a close frame
/// - Heartbeat task: pings periodically and closes on a missed pong
/// - Reader loop (this task): admission deadline, handshake, routing
///
/// The reader loop also watches both tasks: when either finishes, the
/// connection is over and cleanup runs even if the peer never answers.
///
/// The deadline and inbound frames are polled by the same `select!`, so a
/// handshake and the deadline can never be processed concurrently for one
/// connection.
pub async fn run_connection(socket: WebSocket, service: Arc<CollabService>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let pending = service.admission.admit(tx.clone());
    let connection_id = pending.connection_id.clone();
    send_envelope(
        &tx,
        &Envelope::new(MessageBody::AuthRequired(AuthRequired {
            connection_id: connection_id.to_string(),
        })),
    );

    tracing::info!(connection_id = %connection_id, "WebSocket actor started");

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));
    let mut writer_done = false;

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut heartbeat_handle = tokio::spawn(heartbeat_task(
        tx.clone(),
        pong_rx,
        service.config.heartbeat_interval,
        service.config.heartbeat_timeout,
        connection_id.clone(),
    ));

    let deadline = sleep_until(pending.deadline);
    tokio::pin!(deadline);
    let mut state = AuthState::PendingAuth;

    loop {
        tokio::select! {
            _ = &mut deadline, if state.is_pending() => {
                if service.admission.expire(&connection_id) {
                    tracing::warn!(connection_id = %connection_id, "Authentication deadline elapsed");
                    send_error(&tx, ErrorCode::AuthTimeout, "Authentication timed out");
                    close(&tx, CLOSE_AUTH_TIMEOUT, "Authentication timed out");
                }
                state = AuthState::Closed;
                break;
            }
            _ = &mut writer_handle, if !writer_done => {
                // Writer stopped: close frame sent or the sink failed.
                writer_done = true;
                break;
            }
            _ = &mut heartbeat_handle => {
                // Missed pong or writer gone. The close frame is queued; the
                // flush below bounds how long a stalled sink can hold us.
                tracing::info!(connection_id = %connection_id, "Heartbeat ended connection");
                break;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !handle_text(text.as_str(), &tx, &service, &connection_id, &mut state).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    send_error(&tx, ErrorCode::InvalidMessage, "Binary frames are not supported");
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    heartbeat_handle.abort();

    match &state {
        AuthState::PendingAuth => service.admission.discard(&connection_id),
        AuthState::Authenticated(member) => router::disconnect(&service, member).await,
        AuthState::Closed => {}
    }

    // Let queued frames drain. The writer exits once every sender is gone
    // or it has forwarded a close frame.
    drop(tx);
    if !writer_done && timeout(FLUSH_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(connection_id = %connection_id, "WebSocket actor stopped");
}

/// Handle one text frame. Returns false if the connection must close.
async fn handle_text(
    text: &str,
    tx: &ConnectionSender,
    service: &CollabService,
    connection_id: &ConnectionId,
    state: &mut AuthState,
) -> bool {
    let inbound = match decode_frame(text) {
        Ok(inbound) => inbound,
        Err(err) => {
            // A typed frame other than `authenticate` from a pending
            // connection is not_authenticated, whatever its body holds.
            let err = if state.is_pending() && is_typed_non_auth(text) {
                CollabError::new(ErrorCode::NotAuthenticated, "Authenticate first")
            } else {
                err
            };
            tracing::debug!(connection_id = %connection_id, error = %err, "Rejected frame");
            send_envelope(tx, &Envelope::from(&err));
            return true;
        }
    };

    let member = match &*state {
        AuthState::Authenticated(member) => Some(member.clone()),
        AuthState::PendingAuth => None,
        AuthState::Closed => return false,
    };

    match (inbound, member) {
        (Inbound::Ping, _) => {
            let _ = tx.send(Message::Text(PONG_FRAME.into()));
            true
        }
        (Inbound::Authenticate(req), None) => {
            match handshake::authenticate(service, connection_id, req).await {
                Ok(member) => {
                    *state = AuthState::Authenticated(member);
                    true
                }
                Err(err) => report(tx, connection_id, err),
            }
        }
        (Inbound::Authenticate(_), Some(_)) => {
            send_error(
                tx,
                ErrorCode::InvalidConnection,
                "Connection is already authenticated",
            );
            true
        }
        (Inbound::Routable(_), None) => {
            send_error(tx, ErrorCode::NotAuthenticated, "Authenticate first");
            true
        }
        (Inbound::Routable(body), Some(member)) => {
            match router::dispatch(service, &member, body).await {
                Ok(()) => true,
                Err(err) => report(tx, connection_id, err),
            }
        }
    }
}

fn is_typed_non_auth(text: &str) -> bool {
    frame_type(text).is_some_and(|tag| tag != MessageType::Authenticate.as_str())
}

/// Send an error to the client, closing the connection for terminal codes.
/// Returns false once a close frame has been queued.
fn report(tx: &ConnectionSender, connection_id: &ConnectionId, err: CollabError) -> bool {
    tracing::debug!(connection_id = %connection_id, error = %err, "Request failed");
    send_envelope(tx, &Envelope::from(&err));

    if !err.code.closes_connection() {
        return true;
    }
    close(tx, close_code(err.code), &err.message);
    false
}

/// Writer task: receives frames from the mpsc channel and forwards them to the sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
        if closing {
            break;
        }
    }
}

/// Heartbeat task: sends periodic pings and closes the connection if a pong
/// doesn't arrive in time.
async fn heartbeat_task(
    tx: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
    connection_id: ConnectionId,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(connection_id = %connection_id, "Pong timeout, closing connection");
                send_error(&tx, ErrorCode::ConnectionError, "Heartbeat timed out");
                close(&tx, close_code(ErrorCode::ConnectionError), "Pong timeout");
                break;
            }
        }
    }
}
