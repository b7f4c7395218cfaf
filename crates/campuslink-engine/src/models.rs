//! Records owned by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campuslink_shared::{PairKey, RequestId, RequestStatus, SourceType, UnreadSource, UserId};

// ---------------------------------------------------------------------------
// ConnectionRequest
// ---------------------------------------------------------------------------

/// A directional proposal to connect. Resolved requests are kept with their
/// terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub id: RequestId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    /// When the request left `Pending`.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConnectionRequest {
    pub fn pair(&self) -> Option<PairKey> {
        PairKey::new(self.from_user_id, self.to_user_id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// An undirected edge. `pair.low < pair.high` by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub pair: PairKey,
    pub established_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub blocker_id: UserId,
    pub blocked_id: UserId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// UnreadEntry
// ---------------------------------------------------------------------------

/// Per-owner, per-source unread counter. Reset to zero on read, never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadEntry {
    pub owner_id: UserId,
    pub source_type: SourceType,
    /// Counterpart user id for `Direct`, group id for `Group`.
    pub source_id: u64,
    pub count: u32,
    pub last_event_at: DateTime<Utc>,
}

impl UnreadEntry {
    pub fn source(&self) -> UnreadSource {
        UnreadSource::from_parts(self.source_type, self.source_id)
    }
}

/// The relationship between two users as seen by the connection graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relationship {
    None,
    Pending(ConnectionRequest),
    Connected(Connection),
}
