//! Boundaries to the systems this server depends on but does not own:
//! user lookup, out-of-band notification delivery, and the audit log.
//!
//! The SQLite-backed [`crate::db::Store`] implements all three for
//! production; [`InMemoryStore`] backs tests and local runs without a data
//! directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::ws::protocol::UserId;

/// Notification categories handed to [`Notify::send`].
pub const CATEGORY_TASK_ASSIGNED: &str = "task_assigned";
pub const CATEGORY_TASK_UPDATED: &str = "task_updated";
pub const CATEGORY_COMMENT_ADDED: &str = "comment_added";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub role: String,
}

/// One audited session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub session_id: String,
    pub user_id: UserId,
    /// Message type tag, e.g. `chat` or `join`.
    pub kind: String,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

/// A notification request as received by the delivery subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub user_id: UserId,
    pub category: String,
    pub payload: Value,
}

#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn get_by_id(&self, user_id: UserId) -> StoreResult<Option<User>>;
}

/// Fire-and-forget delivery. Callers log failures and move on.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn send(&self, user_id: UserId, category: &str, payload: Value) -> StoreResult<()>;
}

#[async_trait]
pub trait Audit: Send + Sync {
    async fn record(&self, event: AuditEvent) -> StoreResult<()>;
}

/// Process-local implementation of every collaborator.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: Mutex<HashMap<UserId, User>>,
    notifications: Mutex<Vec<NotificationRequest>>,
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.id, user);
        }
    }

    pub fn notifications(&self) -> Vec<NotificationRequest> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl UserLookup for InMemoryStore {
    async fn get_by_id(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let users = self.users.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(users.get(&user_id).cloned())
    }
}

#[async_trait]
impl Notify for InMemoryStore {
    async fn send(&self, user_id: UserId, category: &str, payload: Value) -> StoreResult<()> {
        let mut notifications = self
            .notifications
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        notifications.push(NotificationRequest {
            user_id,
            category: category.to_string(),
            payload,
        });
        Ok(())
    }
}

#[async_trait]
impl Audit for InMemoryStore {
    async fn record(&self, event: AuditEvent) -> StoreResult<()> {
        let mut events = self.events.lock().map_err(|_| StoreError::LockPoisoned)?;
        events.push(event);
        Ok(())
    }
}
