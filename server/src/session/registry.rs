use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::collections::HashMap;

use crate::session::buffer::{ActivityBuffer, BufferSnapshot};
use crate::ws::protocol::{MemberInfo, UserId};
use crate::ws::{ConnectionId, ConnectionSender};

/// Presence status assigned at join.
pub const INITIAL_STATUS: &str = "online";

/// The authenticated identity bound to one connection inside one session.
#[derive(Debug, Clone)]
pub struct SessionMember {
    pub user_id: UserId,
    pub display_name: String,
    pub role: String,
    pub status: String,
    pub last_activity: DateTime<Utc>,
    pub connection_id: ConnectionId,
    pub sender: ConnectionSender,
}

impl SessionMember {
    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            user_id: self.user_id,
            user_name: self.display_name.clone(),
            user_role: self.role.clone(),
            status: self.status.clone(),
            last_activity: self.last_activity,
        }
    }

    /// False once the connection's writer has gone away.
    pub fn is_writable(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// One live session: its members and its replay buffer.
#[derive(Debug)]
pub struct Session {
    members: HashMap<UserId, SessionMember>,
    pub buffer: ActivityBuffer,
}

impl Session {
    fn new(chat_capacity: usize, activity_capacity: usize) -> Self {
        Self {
            members: HashMap::new(),
            buffer: ActivityBuffer::new(chat_capacity, activity_capacity),
        }
    }

    /// Insert a member, returning the one it displaced for the same user.
    pub fn insert_member(&mut self, member: SessionMember) -> Option<SessionMember> {
        self.members.insert(member.user_id, member)
    }

    pub fn member(&self, user_id: UserId) -> Option<&SessionMember> {
        self.members.get(&user_id)
    }

    pub fn member_mut(&mut self, user_id: UserId) -> Option<&mut SessionMember> {
        self.members.get_mut(&user_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &SessionMember> {
        self.members.values()
    }

    pub fn member_infos(&self) -> Vec<MemberInfo> {
        let mut infos: Vec<MemberInfo> = self.members.values().map(SessionMember::info).collect();
        infos.sort_by_key(|m| m.user_id);
        infos
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn history(&self) -> BufferSnapshot {
        self.buffer.snapshot()
    }
}

/// A member removed from its session.
#[derive(Debug)]
pub struct Removal {
    pub member: SessionMember,
    /// True if the session was torn down with this removal.
    pub session_empty: bool,
}

/// Per-session summary for the introspection API.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub member_count: usize,
}

/// In-memory map of session id to its live members.
///
/// Every operation runs under the session's map-entry lock, which serializes
/// concurrent joins and leaves on the same session. Callers must not hold a
/// guard across an `.await`.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    chat_capacity: usize,
    activity_capacity: usize,
}

impl SessionRegistry {
    pub fn new(chat_capacity: usize, activity_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            chat_capacity,
            activity_capacity,
        }
    }

    /// Lock the session, creating it empty if absent.
    pub fn get_or_create(&self, session_id: &str) -> RefMut<'_, String, Session> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(self.chat_capacity, self.activity_capacity))
    }

    /// Run `f` under the session's lock. Returns None if the session doesn't exist.
    pub fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions
            .get_mut(session_id)
            .map(|mut entry| f(entry.value_mut()))
    }

    /// Remove a user from a session. Returns true if the session became empty
    /// (and was therefore deleted along with its buffer).
    pub fn remove(&self, session_id: &str, user_id: UserId) -> bool {
        self.remove_member(session_id, user_id, None)
            .map(|r| r.session_empty)
            .unwrap_or(false)
    }

    /// Remove a user only if they are still bound to `connection_id`.
    ///
    /// An evicted connection's cleanup runs after its replacement has joined;
    /// this keeps it from removing the replacement.
    pub fn remove_connection(
        &self,
        session_id: &str,
        user_id: UserId,
        connection_id: &ConnectionId,
    ) -> Option<Removal> {
        self.remove_member(session_id, user_id, Some(connection_id))
    }

    fn remove_member(
        &self,
        session_id: &str,
        user_id: UserId,
        connection_id: Option<&ConnectionId>,
    ) -> Option<Removal> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let session = occupied.get_mut();
                let bound = session.members.get(&user_id)?;
                if let Some(conn) = connection_id {
                    if &bound.connection_id != conn {
                        return None;
                    }
                }

                let member = session.members.remove(&user_id)?;
                let session_empty = session.members.is_empty();
                if session_empty {
                    occupied.remove();
                    tracing::debug!(session_id = %session_id, "Session emptied and removed");
                }
                Some(Removal {
                    member,
                    session_empty,
                })
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Snapshot of the session's current members, ordered by user id.
    pub fn members(&self, session_id: &str) -> Vec<MemberInfo> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().member_infos())
            .unwrap_or_default()
    }

    pub fn member_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Whether `connection_id` is the one currently bound to this user.
    pub fn is_current(&self, session_id: &str, user_id: UserId, connection_id: &ConnectionId) -> bool {
        self.sessions
            .get(session_id)
            .and_then(|entry| {
                entry
                    .value()
                    .member(user_id)
                    .map(|m| &m.connection_id == connection_id)
            })
            .unwrap_or(false)
    }

    /// Update a member's last-activity timestamp.
    pub fn touch(&self, session_id: &str, user_id: UserId) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            if let Some(member) = entry.value_mut().member_mut(user_id) {
                member.last_activity = Utc::now();
            }
        }
    }

    pub fn set_status(&self, session_id: &str, user_id: UserId, status: &str) -> bool {
        self.with_session(session_id, |session| match session.member_mut(user_id) {
            Some(member) => {
                member.status = status.to_string();
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    /// One summary per live session, ordered by session id.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| SessionSummary {
                session_id: entry.key().clone(),
                member_count: entry.value().len(),
            })
            .collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
