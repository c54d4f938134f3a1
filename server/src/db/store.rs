//! SQLite-backed collaborators: user directory, notification outbox and
//! audit log. Every call runs on the blocking pool so the connection mutex
//! is never held on a runtime worker.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::collaborators::{Audit, AuditEvent, Notify, User, UserLookup};
use crate::db::models::{ActivityLogRow, NotificationRow};
use crate::db::DbPool;
use crate::error::{StoreError, StoreResult};
use crate::ws::protocol::UserId;

#[derive(Clone)]
pub struct Store {
    db: DbPool,
}

impl Store {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }

    /// Insert or update a user in the directory.
    pub async fn upsert_user(&self, user: User) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (id, display_name, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     display_name = excluded.display_name,
                     role = excluded.role,
                     updated_at = excluded.updated_at",
                params![user.id, user.display_name, user.role, now],
            )?;
            Ok(())
        })
        .await
    }

    /// Most recent audited events for a session, oldest first.
    pub async fn recent_activity(&self, session_id: &str, limit: usize) -> StoreResult<Vec<ActivityLogRow>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, user_id, kind, payload, recorded_at
                 FROM activity_log WHERE session_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(params![session_id, limit as i64], |row| {
                    Ok(ActivityLogRow {
                        id: row.get(0)?,
                        session_id: row.get(1)?,
                        user_id: row.get(2)?,
                        kind: row.get(3)?,
                        payload: row.get(4)?,
                        recorded_at: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await
    }

    /// Notifications not yet handed to the delivery subsystem, oldest first.
    pub async fn pending_notifications(&self) -> StoreResult<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, category, payload, created_at, delivered_at
                 FROM notification_outbox WHERE delivered_at IS NULL
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        category: row.get(2)?,
                        payload: row.get(3)?,
                        created_at: row.get(4)?,
                        delivered_at: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Mark an outbox entry as delivered. Returns false if it was unknown or
    /// already delivered.
    pub async fn mark_delivered(&self, notification_id: i64) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE notification_outbox SET delivered_at = ?1
                 WHERE id = ?2 AND delivered_at IS NULL",
                params![Utc::now().to_rfc3339(), notification_id],
            )?;
            Ok(updated == 1)
        })
        .await
    }
}

#[async_trait]
impl UserLookup for Store {
    async fn get_by_id(&self, user_id: UserId) -> StoreResult<Option<User>> {
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, display_name, role FROM users WHERE id = ?1",
                    params![user_id],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            display_name: row.get(1)?,
                            role: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(user)
        })
        .await
    }
}

#[async_trait]
impl Notify for Store {
    async fn send(&self, user_id: UserId, category: &str, payload: Value) -> StoreResult<()> {
        let category = category.to_string();
        let payload = serde_json::to_string(&payload)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO notification_outbox (user_id, category, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, category, payload, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Audit for Store {
    async fn record(&self, event: AuditEvent) -> StoreResult<()> {
        let payload = serde_json::to_string(&event.payload)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO activity_log (session_id, user_id, kind, payload, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.session_id,
                    event.user_id,
                    event.kind,
                    payload,
                    event.recorded_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CATEGORY_TASK_ASSIGNED;
    use crate::db::init_memory_db;
    use serde_json::json;

    fn store() -> Store {
        Store::new(init_memory_db().unwrap())
    }

    #[tokio::test]
    async fn user_lookup_finds_upserted_users() {
        let store = store();
        assert_eq!(store.get_by_id(7).await.unwrap(), None);

        store
            .upsert_user(User {
                id: 7,
                display_name: "Ada".into(),
                role: "lead".into(),
            })
            .await
            .unwrap();
        store
            .upsert_user(User {
                id: 7,
                display_name: "Ada L.".into(),
                role: "lead".into(),
            })
            .await
            .unwrap();

        let user = store.get_by_id(7).await.unwrap().unwrap();
        assert_eq!(user.display_name, "Ada L.");
        assert_eq!(user.role, "lead");
    }

    #[tokio::test]
    async fn notifications_queue_until_delivered() {
        let store = store();
        store
            .send(2, CATEGORY_TASK_ASSIGNED, json!({ "taskId": 77 }))
            .await
            .unwrap();

        let pending = store.pending_notifications().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, 2);
        assert_eq!(pending[0].category, "task_assigned");
        let payload: Value = serde_json::from_str(&pending[0].payload).unwrap();
        assert_eq!(payload["taskId"], 77);

        assert!(store.mark_delivered(pending[0].id).await.unwrap());
        assert!(!store.mark_delivered(pending[0].id).await.unwrap());
        assert!(store.pending_notifications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_events_are_scoped_to_their_session() {
        let store = store();
        for (session, kind) in [("S1", "join"), ("S2", "join"), ("S1", "chat"), ("S1", "leave")] {
            store
                .record(AuditEvent {
                    session_id: session.into(),
                    user_id: 1,
                    kind: kind.into(),
                    payload: json!({}),
                    recorded_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let kinds: Vec<String> = store
            .recent_activity("S1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.kind)
            .collect();
        assert_eq!(kinds, vec!["join", "chat", "leave"]);

        let latest = store.recent_activity("S1", 1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].kind, "leave");
    }
}
