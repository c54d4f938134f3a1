//! Session layer: membership, replay history, the authentication handshake
//! and the per-message router.

pub mod api;
pub mod buffer;
pub mod handshake;
pub mod registry;
pub mod router;

pub use registry::{Removal, Session, SessionMember, SessionRegistry};

use crate::ws::protocol::UserId;
use crate::ws::ConnectionId;

/// Identity of an authenticated connection, held by its actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberKey {
    pub session_id: String,
    pub user_id: UserId,
    pub user_name: String,
    pub connection_id: ConnectionId,
}
