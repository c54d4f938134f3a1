/// Database row types for the tables the store reads back.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// Audited session event in the activity_log table
#[derive(Debug, Clone)]
pub struct ActivityLogRow {
    pub id: i64,
    pub session_id: String,
    pub user_id: i64,
    pub kind: String,
    /// JSON-encoded envelope or event payload
    pub payload: String,
    pub recorded_at: String,
}

/// Queued notification in the notification_outbox table
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    /// task_assigned, task_updated or comment_added
    pub category: String,
    pub payload: String,
    pub created_at: String,
    /// NULL until the delivery worker picks it up
    pub delivered_at: Option<String>,
}
