//! Point-in-time copy of everything the engine owns, used by the
//! persistence adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Block, Connection, ConnectionRequest, UnreadEntry};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub taken_at: Option<DateTime<Utc>>,
    /// Next connection request id to hand out.
    pub next_request_id: u64,
    pub blocks: Vec<Block>,
    /// Pending and resolved requests.
    pub requests: Vec<ConnectionRequest>,
    pub connections: Vec<Connection>,
    pub unread: Vec<UnreadEntry>,
}

impl EngineSnapshot {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
            && self.requests.is_empty()
            && self.connections.is_empty()
            && self.unread.is_empty()
    }
}
