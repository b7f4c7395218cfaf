//! Notification feed.
//!
//! Read-only composition of the graph's pending incoming requests and the
//! tracker's non-zero unread entries; only `acknowledge` and
//! `mark_all_read` write. The two sub-reads are not taken under
//! a common lock, so an item may appear or vanish between them; callers poll
//! and treat the feed as eventually consistent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use campuslink_shared::constants::{
    FEED_PREFIX_GROUP_MESSAGE, FEED_PREFIX_MESSAGE, FEED_PREFIX_REQUEST, UNKNOWN_GROUP_NAME,
};
use campuslink_shared::protocol::{NotificationItem, NotificationType};
use campuslink_shared::{EngineError, EngineResult, GroupId, RequestId, UnreadSource, UserId};

use crate::directory::{GroupDirectory, ProfileCache, ProfileDirectory};
use crate::graph::ConnectionGraph;
use crate::unread::UnreadTracker;

/// Synthetic feed item id, namespaced by source so request- and
/// message-derived items never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedItemId {
    /// `req-<fromUserId>`
    Request(UserId),
    /// `msg-<counterpartId>`
    Message(UserId),
    /// `gmsg-<groupId>`
    GroupMessage(GroupId),
}

impl FeedItemId {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(rest) = raw.strip_prefix(FEED_PREFIX_REQUEST) {
            rest.parse().ok().map(Self::Request)
        } else if let Some(rest) = raw.strip_prefix(FEED_PREFIX_MESSAGE) {
            rest.parse().ok().map(Self::Message)
        } else if let Some(rest) = raw.strip_prefix(FEED_PREFIX_GROUP_MESSAGE) {
            rest.parse().ok().map(Self::GroupMessage)
        } else {
            None
        }
    }
}

impl fmt::Display for FeedItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(user) => write!(f, "{FEED_PREFIX_REQUEST}{user}"),
            Self::Message(user) => write!(f, "{FEED_PREFIX_MESSAGE}{user}"),
            Self::GroupMessage(group) => write!(f, "{FEED_PREFIX_GROUP_MESSAGE}{group}"),
        }
    }
}

/// What acknowledging a feed item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// A message counter was reset; `cleared` unread messages.
    Read { cleared: u32 },
    /// A connection request was flagged as seen. It is still pending.
    RequestSeen,
}

pub struct NotificationAggregator {
    graph: Arc<ConnectionGraph>,
    unread: Arc<UnreadTracker>,
    profiles: Arc<dyn ProfileDirectory>,
    groups: Arc<dyn GroupDirectory>,
    /// owner -> pending requests the owner has acknowledged
    seen: DashMap<UserId, BTreeSet<RequestId>>,
}

impl NotificationAggregator {
    pub fn new(
        graph: Arc<ConnectionGraph>,
        unread: Arc<UnreadTracker>,
        profiles: Arc<dyn ProfileDirectory>,
        groups: Arc<dyn GroupDirectory>,
    ) -> Self {
        Self {
            graph,
            unread,
            profiles,
            groups,
            seen: DashMap::new(),
        }
    }

    /// The owner's feed: newest first, ties broken by
    /// request > direct message > group message, then by id.
    pub fn feed_for(&self, owner: UserId) -> EngineResult<Vec<NotificationItem>> {
        let incoming = self.graph.list_incoming(owner);
        let unread = self.unread.unread_for(owner)?;

        let mut profiles = ProfileCache::new(&*self.profiles);
        let mut items: BTreeMap<String, NotificationItem> = BTreeMap::new();

        for request in &incoming {
            let sender = profiles.get(request.from_user_id)?;
            insert_newest(
                &mut items,
                NotificationItem {
                    id: FeedItemId::Request(request.from_user_id).to_string(),
                    kind: NotificationType::ConnectionRequest,
                    user_id: Some(request.from_user_id),
                    message: format!("{} sent you a connection request", sender.display_name),
                    user_name: Some(sender.display_name),
                    group_id: None,
                    group_name: None,
                    timestamp: request.created_at,
                    is_read: false,
                },
            );
        }

        for entry in unread {
            let item = match entry.source() {
                UnreadSource::Direct(counterpart) => {
                    let sender = profiles.get(counterpart)?;
                    NotificationItem {
                        id: FeedItemId::Message(counterpart).to_string(),
                        kind: NotificationType::NewMessage,
                        user_id: Some(counterpart),
                        message: format!(
                            "{} sent you {}",
                            sender.display_name,
                            message_count(entry.count)
                        ),
                        user_name: Some(sender.display_name),
                        group_id: None,
                        group_name: None,
                        timestamp: entry.last_event_at,
                        is_read: false,
                    }
                }
                UnreadSource::Group(group) => {
                    let name = self
                        .groups
                        .group_name(group)?
                        .unwrap_or_else(|| UNKNOWN_GROUP_NAME.to_string());
                    NotificationItem {
                        id: FeedItemId::GroupMessage(group).to_string(),
                        kind: NotificationType::NewGroupMessage,
                        user_id: None,
                        user_name: None,
                        group_id: Some(group),
                        message: format!("{} in {}", message_count(entry.count), name),
                        group_name: Some(name),
                        timestamp: entry.last_event_at,
                        is_read: false,
                    }
                }
            };
            insert_newest(&mut items, item);
        }

        let mut feed: Vec<NotificationItem> = items.into_values().collect();
        feed.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(a.kind.priority().cmp(&b.kind.priority()))
                .then(a.id.cmp(&b.id))
        });

        debug!(%owner, items = feed.len(), "Feed assembled");
        Ok(feed)
    }

    /// Acknowledge one feed item. Message items reset their counter; request
    /// items are only flagged as seen and stay pending until answered.
    pub fn acknowledge(&self, owner: UserId, item_id: &str) -> EngineResult<Acknowledgement> {
        let id = FeedItemId::parse(item_id).ok_or_else(|| {
            EngineError::InvalidOperation(format!("Unknown notification id '{item_id}'"))
        })?;

        match id {
            FeedItemId::Request(from) => {
                let incoming = self.graph.list_incoming(owner);
                let request = incoming
                    .iter()
                    .find(|request| request.from_user_id == from)
                    .ok_or_else(|| {
                        EngineError::NotFound(format!("No pending request from user {from}"))
                    })?;
                let pending: BTreeSet<RequestId> = incoming.iter().map(|r| r.id).collect();
                let mut seen = self.seen.entry(owner).or_default();
                seen.retain(|id| pending.contains(id));
                seen.insert(request.id);
                Ok(Acknowledgement::RequestSeen)
            }
            FeedItemId::Message(counterpart) => Ok(Acknowledgement::Read {
                cleared: self.unread.mark_read(owner, UnreadSource::Direct(counterpart)),
            }),
            FeedItemId::GroupMessage(group) => Ok(Acknowledgement::Read {
                cleared: self.unread.mark_read(owner, UnreadSource::Group(group)),
            }),
        }
    }

    /// Reset every message counter. Pending requests are untouched and show
    /// up again on the next fetch. Returns how many counters changed.
    pub fn mark_all_read(&self, owner: UserId) -> usize {
        let cleared = self.unread.mark_all_read(owner);
        debug!(%owner, cleared, "Marked all notifications read");
        cleared
    }

    /// Whether `owner` acknowledged `request` while it is still pending for
    /// them. Flags for requests that have since been answered, cancelled or
    /// severed read as unseen; they are dropped on the owner's next
    /// acknowledgement.
    pub fn has_seen(&self, owner: UserId, request: RequestId) -> bool {
        let flagged = self
            .seen
            .get(&owner)
            .map(|ids| ids.contains(&request))
            .unwrap_or(false);
        flagged
            && self
                .graph
                .request(request)
                .map(|r| r.is_pending() && r.to_user_id == owner)
                .unwrap_or(false)
    }
}

fn insert_newest(items: &mut BTreeMap<String, NotificationItem>, item: NotificationItem) {
    match items.get(&item.id) {
        Some(existing) if existing.timestamp >= item.timestamp => {}
        _ => {
            items.insert(item.id.clone(), item);
        }
    }
}

fn message_count(count: u32) -> String {
    if count == 1 {
        "1 new message".to_string()
    } else {
        format!("{count} new messages")
    }
}
