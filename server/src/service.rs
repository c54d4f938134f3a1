use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{Audit, AuditEvent, InMemoryStore, Notify, User, UserLookup};
use crate::session::buffer::{DEFAULT_ACTIVITY_CAPACITY, DEFAULT_CHAT_CAPACITY};
use crate::session::SessionRegistry;
use crate::ws::admission::{Admission, DEFAULT_AUTH_TIMEOUT};
use crate::ws::broadcast::fan_out;
use crate::ws::protocol::{Envelope, MeetingReminder, MessageBody, UserId};

/// Tunables for the collaboration layer.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    pub auth_timeout: Duration,
    pub chat_capacity: usize,
    pub activity_capacity: usize,
    /// Interval between server-initiated WebSocket pings.
    pub heartbeat_interval: Duration,
    /// How long to wait for the pong before declaring the connection dead.
    pub heartbeat_timeout: Duration,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            chat_capacity: DEFAULT_CHAT_CAPACITY,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
        }
    }
}

/// The collaboration service. Constructed once at startup and shared with
/// every connection through the router state.
pub struct CollabService {
    pub registry: SessionRegistry,
    pub admission: Admission,
    pub config: CollabConfig,
    users: Arc<dyn UserLookup>,
    notifier: Arc<dyn Notify>,
    audit: Arc<dyn Audit>,
}

impl CollabService {
    pub fn new(
        config: CollabConfig,
        users: Arc<dyn UserLookup>,
        notifier: Arc<dyn Notify>,
        audit: Arc<dyn Audit>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(config.chat_capacity, config.activity_capacity),
            admission: Admission::new(config.auth_timeout),
            config,
            users,
            notifier,
            audit,
        }
    }

    /// Service backed entirely by one in-memory store.
    pub fn in_memory(config: CollabConfig, store: Arc<InMemoryStore>) -> Self {
        Self::new(config, store.clone(), store.clone(), store)
    }

    /// Advisory user lookup: failures and unknown users are logged, never fatal.
    pub async fn lookup_user(&self, user_id: UserId) -> Option<User> {
        match self.users.get_by_id(user_id).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                tracing::warn!(user_id, "User not found in lookup, continuing");
                None
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "User lookup failed, continuing");
                None
            }
        }
    }

    pub async fn notify(&self, user_id: UserId, category: &str, payload: Value) {
        if let Err(e) = self.notifier.send(user_id, category, payload).await {
            tracing::warn!(user_id, category, error = %e, "Notification request failed");
        }
    }

    pub async fn record(&self, event: AuditEvent) {
        let kind = event.kind.clone();
        if let Err(e) = self.audit.record(event).await {
            tracing::warn!(kind = %kind, error = %e, "Audit write failed");
        }
    }

    /// Broadcast a server-originated meeting reminder and keep it in the
    /// session's activity history. Returns None if the session doesn't exist.
    pub fn send_meeting_reminder(&self, session_id: &str, reminder: MeetingReminder) -> Option<usize> {
        let mut envelope = Envelope::new(MessageBody::MeetingReminder(reminder));
        envelope.session_id = Some(session_id.to_string());

        self.registry.with_session(session_id, |session| {
            envelope.stamp();
            session.buffer.append_activity(envelope.clone());
            fan_out(session, &envelope, &[]).unwrap_or_else(|e| {
                tracing::error!(session_id = %session_id, error = %e, "Meeting reminder broadcast failed");
                0
            })
        })
    }
}
