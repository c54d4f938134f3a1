//! Pending-connection tracking and the authentication deadline.
//!
//! A connection is pending from the moment it is admitted until exactly one of
//! two things claims it: a successful handshake ([`Admission::claim`]) or the
//! deadline ([`Admission::expire`]). Both remove the entry from the pending
//! map, and map removal is atomic, so whichever runs first wins and the other
//! sees nothing to act on.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{CollabError, ErrorCode};
use crate::ws::{ConnectionId, ConnectionSender};

/// Default time a connection may stay unauthenticated.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// A transport that has been issued a connection id but not yet authenticated.
#[derive(Debug, Clone)]
pub struct PendingConnection {
    pub connection_id: ConnectionId,
    pub sender: ConnectionSender,
    pub deadline: Instant,
}

#[derive(Debug)]
pub struct Admission {
    pending: DashMap<ConnectionId, PendingConnection>,
    auth_timeout: Duration,
}

impl Admission {
    pub fn new(auth_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            auth_timeout,
        }
    }

    /// Register a new transport as pending and return its id and deadline.
    pub fn admit(&self, sender: ConnectionSender) -> PendingConnection {
        let now = Instant::now();
        let pending = PendingConnection {
            connection_id: ConnectionId::generate(),
            sender,
            deadline: now + self.auth_timeout,
        };
        self.pending
            .insert(pending.connection_id.clone(), pending.clone());

        tracing::debug!(
            connection_id = %pending.connection_id,
            pending = self.pending.len(),
            "Connection admitted"
        );
        pending
    }

    pub fn is_pending(&self, connection_id: &ConnectionId) -> bool {
        self.pending.contains_key(connection_id)
    }

    /// Resolve the pending entry in favour of the handshake.
    ///
    /// Fails with `invalid_connection` if nothing is pending under this id,
    /// and with `auth_timeout` if the deadline has already passed, even when
    /// the deadline has not been acted on yet. Either way the entry is gone
    /// afterwards.
    pub fn claim(&self, connection_id: &ConnectionId) -> Result<PendingConnection, CollabError> {
        let (_, pending) = self.pending.remove(connection_id).ok_or_else(|| {
            CollabError::new(
                ErrorCode::InvalidConnection,
                format!("no pending connection {connection_id}"),
            )
        })?;

        if Instant::now() >= pending.deadline {
            return Err(CollabError::new(
                ErrorCode::AuthTimeout,
                "authentication deadline elapsed",
            ));
        }
        Ok(pending)
    }

    /// Resolve the pending entry in favour of the deadline.
    /// Returns false if the handshake got there first.
    pub fn expire(&self, connection_id: &ConnectionId) -> bool {
        self.pending.remove(connection_id).is_some()
    }

    /// Drop a pending entry whose transport closed before authenticating.
    pub fn discard(&self, connection_id: &ConnectionId) {
        self.pending.remove(connection_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
