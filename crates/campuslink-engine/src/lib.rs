//! # campuslink-engine
//!
//! In-memory relationship state for the campus network: directional blocks,
//! the connection graph, per-source unread counters and the notification
//! feed built from them.
//!
//! Every operation that touches a user pair runs under that pair's lock, so
//! a block and a concurrent request, accept or message delivery on the same
//! pair can never interleave into an invalid state.

pub mod blocks;
pub mod clock;
pub mod directory;
pub mod engine;
pub mod graph;
pub mod locks;
pub mod models;
pub mod notifications;
pub mod snapshot;
pub mod unread;

pub use blocks::BlockRegistry;
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{GroupDirectory, MemoryDirectory, ProfileDirectory, UserProfile};
pub use engine::SocialEngine;
pub use graph::ConnectionGraph;
pub use models::{Block, Connection, ConnectionRequest, Relationship, UnreadEntry};
pub use notifications::{Acknowledgement, FeedItemId, NotificationAggregator};
pub use snapshot::EngineSnapshot;
pub use unread::UnreadTracker;
