//! Connection requests and established connections.
//!
//! Each unordered pair moves through
//!
//! ```text
//! NONE ──request──→ PENDING(from→to) ──accept──→ CONNECTED
//!                        │                           │
//!                        └──decline/cancel──→ NONE ←─┘ disconnect
//!
//! any state ──block──→ NONE
//! ```
//!
//! The pair's current state is a single [`Link`] slot, so a pending request
//! and a connection can never coexist for the same pair. Resolved requests
//! stay in `requests` with their terminal status.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use campuslink_shared::{
    Decision, EngineError, EngineResult, PairKey, RequestId, RequestStatus, UserId,
};

use crate::blocks::BlockRegistry;
use crate::clock::Clock;
use crate::locks::{PairGuard, PairLocks};
use crate::models::{Connection, ConnectionRequest, Relationship};

#[derive(Debug, Clone)]
enum Link {
    Pending(RequestId),
    Connected(Connection),
}

pub(crate) struct GraphSnapshot {
    pub next_request_id: u64,
    pub requests: Vec<ConnectionRequest>,
    pub connections: Vec<Connection>,
}

pub struct ConnectionGraph {
    blocks: Arc<BlockRegistry>,
    locks: Arc<PairLocks>,
    clock: Arc<dyn Clock>,
    next_request_id: AtomicU64,
    requests: DashMap<RequestId, ConnectionRequest>,
    links: DashMap<PairKey, Link>,
    /// user -> users they share a link with (pending either way, or connected)
    neighbours: DashMap<UserId, BTreeSet<UserId>>,
}

impl ConnectionGraph {
    pub fn new(blocks: Arc<BlockRegistry>, locks: Arc<PairLocks>, clock: Arc<dyn Clock>) -> Self {
        Self {
            blocks,
            locks,
            clock,
            next_request_id: AtomicU64::new(1),
            requests: DashMap::new(),
            links: DashMap::new(),
            neighbours: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn request_connection(&self, from: UserId, to: UserId) -> EngineResult<RequestId> {
        let pair = PairKey::new(from, to).ok_or(EngineError::SelfRequest)?;
        let _guard = self.locks.lock(pair);

        if self.blocks.is_blocked(from, to) {
            debug!(%from, %to, "Connection request rejected: blocked");
            return Err(EngineError::Blocked);
        }

        match self.link(pair) {
            Some(Link::Pending(_)) => return Err(EngineError::AlreadyPending),
            Some(Link::Connected(_)) => return Err(EngineError::AlreadyConnected),
            None => {}
        }

        let id = RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        self.requests.insert(
            id,
            ConnectionRequest {
                id,
                from_user_id: from,
                to_user_id: to,
                created_at: self.clock.now(),
                status: RequestStatus::Pending,
                resolved_at: None,
            },
        );
        self.links.insert(pair, Link::Pending(id));
        self.link_neighbours(pair);

        info!(request = %id, %from, %to, "Connection request created");
        Ok(id)
    }

    /// Accept or decline a pending request. Only its recipient may respond.
    ///
    /// If the pair is blocked the request is declined on the spot and
    /// `Blocked` is still returned.
    pub fn respond(
        &self,
        responder: UserId,
        request_id: RequestId,
        decision: Decision,
    ) -> EngineResult<()> {
        let pair = self
            .requests
            .get(&request_id)
            .and_then(|request| request.value().pair())
            .ok_or_else(|| request_not_found(request_id))?;

        let guard = self.locks.lock(pair);
        let request = self
            .request(request_id)
            .ok_or_else(|| request_not_found(request_id))?;

        if request.to_user_id != responder {
            return Err(EngineError::Forbidden(
                "Only the recipient can respond to this request".into(),
            ));
        }

        if self.blocks.is_blocked(request.from_user_id, request.to_user_id) {
            if request.is_pending() {
                self.resolve_locked(&guard, request_id, RequestStatus::Declined);
                info!(request = %request_id, "Pending request declined: pair is blocked");
            }
            return Err(EngineError::Blocked);
        }

        if !request.is_pending() {
            return Err(EngineError::NotFound(format!(
                "Request {request_id} is already resolved"
            )));
        }

        match decision {
            Decision::Accept => {
                let now = self.clock.now();
                self.set_status(request_id, RequestStatus::Accepted);
                self.links.insert(
                    pair,
                    Link::Connected(Connection {
                        pair,
                        established_at: now,
                    }),
                );
                info!(
                    request = %request_id,
                    a = %pair.low,
                    b = %pair.high,
                    "Connection established"
                );
            }
            Decision::Decline => {
                self.resolve_locked(&guard, request_id, RequestStatus::Declined);
                info!(request = %request_id, "Connection request declined");
            }
        }

        Ok(())
    }

    /// Withdraw a pending request. Only its sender may cancel.
    pub fn cancel(&self, request_id: RequestId, by: UserId) -> EngineResult<()> {
        let request = self
            .request(request_id)
            .ok_or_else(|| request_not_found(request_id))?;

        if request.from_user_id != by {
            return Err(EngineError::Forbidden(
                "Only the sender can cancel this request".into(),
            ));
        }

        let pair = request.pair().ok_or_else(|| request_not_found(request_id))?;
        let guard = self.locks.lock(pair);

        let still_pending = self
            .requests
            .get(&request_id)
            .map(|r| r.is_pending())
            .unwrap_or(false);
        if !still_pending {
            return Err(EngineError::NotFound(format!(
                "Request {request_id} is no longer pending"
            )));
        }

        self.resolve_locked(&guard, request_id, RequestStatus::Cancelled);
        info!(request = %request_id, %by, "Connection request cancelled");
        Ok(())
    }

    /// Remove an established connection. Nothing else about the pair changes.
    pub fn disconnect(&self, a: UserId, b: UserId) -> EngineResult<()> {
        let pair = PairKey::new(a, b)
            .ok_or_else(|| EngineError::InvalidOperation("Cannot disconnect from yourself".into()))?;
        let _guard = self.locks.lock(pair);

        let removed = self
            .links
            .remove_if(&pair, |_, link| matches!(link, Link::Connected(_)));
        if removed.is_none() {
            return Err(EngineError::NotFound("Connection not found".into()));
        }

        self.unlink_neighbours(pair);
        info!(%a, %b, "Connection removed");
        Ok(())
    }

    /// Drop any pending request and any connection between `a` and `b`.
    pub fn sever_all(&self, a: UserId, b: UserId) {
        if let Some(pair) = PairKey::new(a, b) {
            let guard = self.locks.lock(pair);
            self.sever_locked(&guard);
        }
    }

    /// Block cascade step; the caller already holds the pair's lock.
    pub(crate) fn sever_locked(&self, guard: &PairGuard) {
        let pair = guard.pair();
        let Some((_, link)) = self.links.remove(&pair) else {
            return;
        };

        match link {
            Link::Pending(id) => {
                self.set_status(id, RequestStatus::Declined);
                debug!(request = %id, %pair, "Pending request severed");
            }
            Link::Connected(_) => {
                debug!(%pair, "Connection severed");
            }
        }
        self.unlink_neighbours(pair);
    }

    // -----------------------------------------------------------------------
    // Read views
    // -----------------------------------------------------------------------

    /// Users connected to `user`, ascending by id.
    pub fn list_connections(&self, user: UserId) -> Vec<UserId> {
        self.visible_links(user)
            .into_iter()
            .filter_map(|(other, link)| match link {
                Link::Connected(_) => Some(other),
                Link::Pending(_) => None,
            })
            .collect()
    }

    /// Pending requests addressed to `user`, newest first.
    pub fn list_incoming(&self, user: UserId) -> Vec<ConnectionRequest> {
        self.pending_requests(user, |request| request.to_user_id == user)
    }

    /// Pending requests sent by `user`, newest first.
    pub fn list_outgoing(&self, user: UserId) -> Vec<ConnectionRequest> {
        self.pending_requests(user, |request| request.from_user_id == user)
    }

    pub fn relationship(&self, a: UserId, b: UserId) -> Relationship {
        let Some(pair) = PairKey::new(a, b) else {
            return Relationship::None;
        };
        match self.link(pair) {
            Some(Link::Connected(connection)) => Relationship::Connected(connection),
            Some(Link::Pending(id)) => self
                .request(id)
                .map(Relationship::Pending)
                .unwrap_or(Relationship::None),
            None => Relationship::None,
        }
    }

    pub fn request(&self, id: RequestId) -> Option<ConnectionRequest> {
        self.requests.get(&id).map(|r| r.clone())
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Copy out every request and connection. Each pair's state is read under
    /// its lock, so a pair is never captured half-way through a transition.
    pub(crate) fn snapshot(&self) -> GraphSnapshot {
        let mut requests: BTreeMap<RequestId, ConnectionRequest> = self
            .requests
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut pending_by_pair: HashMap<PairKey, Vec<RequestId>> = HashMap::new();
        for request in requests.values().filter(|r| r.is_pending()) {
            if let Some(pair) = request.pair() {
                pending_by_pair.entry(pair).or_default().push(request.id);
            }
        }

        let mut pairs: BTreeSet<PairKey> = self.links.iter().map(|entry| *entry.key()).collect();
        pairs.extend(pending_by_pair.keys().copied());

        let mut connections = Vec::new();
        for pair in pairs {
            let _guard = self.locks.lock(pair);

            let mut stale: Vec<RequestId> = pending_by_pair.remove(&pair).unwrap_or_default();
            match self.link(pair) {
                Some(Link::Connected(connection)) => connections.push(connection),
                Some(Link::Pending(id)) => stale.push(id),
                None => {}
            }
            for id in stale {
                if let Some(fresh) = self.request(id) {
                    requests.insert(id, fresh);
                }
            }
        }

        GraphSnapshot {
            next_request_id: self.next_request_id.load(Ordering::Relaxed),
            requests: requests.into_values().collect(),
            connections,
        }
    }

    /// Load persisted state into an empty graph, repairing anything that
    /// would violate the pair invariants.
    pub(crate) fn restore(
        &self,
        next_request_id: u64,
        mut requests: Vec<ConnectionRequest>,
        connections: Vec<Connection>,
    ) {
        for connection in connections {
            let Some(pair) = PairKey::new(connection.pair.low, connection.pair.high) else {
                continue;
            };
            if self.blocks.is_blocked(pair.low, pair.high) {
                warn!(%pair, "Dropping persisted connection between blocked users");
                continue;
            }
            self.links.insert(
                pair,
                Link::Connected(Connection {
                    pair,
                    established_at: connection.established_at,
                }),
            );
            self.link_neighbours(pair);
        }

        requests.sort_by_key(|r| r.id);
        let mut max_id = 0;
        for mut request in requests {
            max_id = max_id.max(request.id.0);
            let Some(pair) = request.pair() else {
                continue;
            };

            if request.is_pending() {
                let repaired = if self.blocks.is_blocked(pair.low, pair.high) {
                    Some(RequestStatus::Declined)
                } else {
                    match self.link(pair) {
                        Some(Link::Connected(_)) => Some(RequestStatus::Accepted),
                        Some(Link::Pending(_)) => Some(RequestStatus::Declined),
                        None => None,
                    }
                };

                match repaired {
                    Some(status) => {
                        warn!(
                            request = %request.id,
                            status = status.as_str(),
                            "Repaired persisted pending request"
                        );
                        request.status = status;
                        request.resolved_at = Some(self.clock.now());
                    }
                    None => {
                        self.links.insert(pair, Link::Pending(request.id));
                        self.link_neighbours(pair);
                    }
                }
            }

            self.requests.insert(request.id, request);
        }

        let next = next_request_id.max(max_id + 1).max(1);
        self.next_request_id.store(next, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn link(&self, pair: PairKey) -> Option<Link> {
        self.links.get(&pair).map(|link| link.value().clone())
    }

    fn set_status(&self, id: RequestId, status: RequestStatus) {
        let now = self.clock.now();
        if let Some(mut request) = self.requests.get_mut(&id) {
            request.status = status;
            request.resolved_at = Some(now);
        }
    }

    /// Move a pending request to a terminal status and free the pair.
    fn resolve_locked(&self, guard: &PairGuard, id: RequestId, status: RequestStatus) {
        let pair = guard.pair();
        self.set_status(id, status);
        let removed = self
            .links
            .remove_if(&pair, |_, link| matches!(link, Link::Pending(p) if *p == id));
        if removed.is_some() {
            self.unlink_neighbours(pair);
        }
    }

    /// Links of `user` whose pair is not blocked, ascending by the other user.
    fn visible_links(&self, user: UserId) -> Vec<(UserId, Link)> {
        let others: Vec<UserId> = self
            .neighbours
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        others
            .into_iter()
            .filter(|other| !self.blocks.is_blocked(user, *other))
            .filter_map(|other| {
                let pair = PairKey::new(user, other)?;
                self.link(pair).map(|link| (other, link))
            })
            .collect()
    }

    fn pending_requests<F>(&self, user: UserId, keep: F) -> Vec<ConnectionRequest>
    where
        F: Fn(&ConnectionRequest) -> bool,
    {
        let mut requests: Vec<ConnectionRequest> = self
            .visible_links(user)
            .into_iter()
            .filter_map(|(_, link)| match link {
                Link::Pending(id) => self.request(id),
                Link::Connected(_) => None,
            })
            .filter(|request| request.is_pending() && keep(request))
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        requests
    }

    fn link_neighbours(&self, pair: PairKey) {
        self.neighbours.entry(pair.low).or_default().insert(pair.high);
        self.neighbours.entry(pair.high).or_default().insert(pair.low);
    }

    fn unlink_neighbours(&self, pair: PairKey) {
        for (user, other) in [(pair.low, pair.high), (pair.high, pair.low)] {
            if let Some(mut set) = self.neighbours.get_mut(&user) {
                set.remove(&other);
            }
            self.neighbours.remove_if(&user, |_, set| set.is_empty());
        }
    }
}

fn request_not_found(id: RequestId) -> EngineError {
    EngineError::NotFound(format!("Connection request {id} not found"))
}
