//! Composition root.
//!
//! `SocialEngine` wires the block registry, the connection graph, the unread
//! tracker and the notification aggregator around one shared pair-lock
//! table and one clock. The server holds a single engine behind an `Arc`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use campuslink_shared::protocol::{BlockedUser, ConnectionsSummary, RequestSummary, UserSummary};
use campuslink_shared::{EngineError, EngineResult, UnreadSource, UserId};

use crate::blocks::BlockRegistry;
use crate::clock::{Clock, SystemClock};
use crate::directory::{GroupDirectory, ProfileCache, ProfileDirectory};
use crate::graph::ConnectionGraph;
use crate::locks::PairLocks;
use crate::models::ConnectionRequest;
use crate::notifications::NotificationAggregator;
use crate::snapshot::EngineSnapshot;
use crate::unread::UnreadTracker;

pub struct SocialEngine {
    clock: Arc<dyn Clock>,
    locks: Arc<PairLocks>,
    profiles: Arc<dyn ProfileDirectory>,
    blocks: Arc<BlockRegistry>,
    graph: Arc<ConnectionGraph>,
    unread: Arc<UnreadTracker>,
    notifications: NotificationAggregator,
}

impl SocialEngine {
    pub fn new(profiles: Arc<dyn ProfileDirectory>, groups: Arc<dyn GroupDirectory>) -> Self {
        Self::with_clock(profiles, groups, Arc::new(SystemClock))
    }

    pub fn with_clock(
        profiles: Arc<dyn ProfileDirectory>,
        groups: Arc<dyn GroupDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let locks = Arc::new(PairLocks::new());
        let blocks = Arc::new(BlockRegistry::new(locks.clone(), clock.clone()));
        let graph = Arc::new(ConnectionGraph::new(
            blocks.clone(),
            locks.clone(),
            clock.clone(),
        ));
        let unread = Arc::new(UnreadTracker::new(
            blocks.clone(),
            locks.clone(),
            groups.clone(),
            clock.clone(),
        ));
        let notifications =
            NotificationAggregator::new(graph.clone(), unread.clone(), profiles.clone(), groups);

        Self {
            clock,
            locks,
            profiles,
            blocks,
            graph,
            unread,
            notifications,
        }
    }

    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    pub fn notifications(&self) -> &NotificationAggregator {
        &self.notifications
    }

    // -----------------------------------------------------------------------
    // Blocking
    // -----------------------------------------------------------------------

    /// Block `blocked` on behalf of `blocker`, severing their connection or
    /// pending request and zeroing their direct unread counters.
    pub fn block(&self, blocker: UserId, blocked: UserId) -> EngineResult<()> {
        self.blocks.block(blocker, blocked, &self.graph, &self.unread)
    }

    pub fn unblock(&self, blocker: UserId, blocked: UserId) -> EngineResult<()> {
        self.blocks.unblock(blocker, blocked)
    }

    /// Users `blocker` has blocked, most recent first, with display data.
    pub fn blocked_users(&self, blocker: UserId) -> EngineResult<Vec<BlockedUser>> {
        let mut profiles = ProfileCache::new(&*self.profiles);
        self.blocks
            .blocked_by(blocker)
            .into_iter()
            .map(|block| {
                let profile = profiles.get(block.blocked_id)?;
                Ok(BlockedUser {
                    user_id: block.blocked_id,
                    display_name: profile.display_name,
                    avatar_url: profile.avatar_url,
                    blocked_at: block.created_at,
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Everything the connections page shows for `user`: connected users,
    /// pending requests both ways, and direct unread counts per connection.
    pub fn connection_summary(&self, user: UserId) -> EngineResult<ConnectionsSummary> {
        let mut profiles = ProfileCache::new(&*self.profiles);

        let connected = self.graph.list_connections(user);
        let mut connections = Vec::with_capacity(connected.len());
        for other in &connected {
            let profile = profiles.get(*other)?;
            connections.push(UserSummary {
                id: *other,
                display_name: profile.display_name,
                avatar_url: profile.avatar_url,
                campus_domain: profile.campus_domain,
            });
        }

        let incoming = self
            .graph
            .list_incoming(user)
            .into_iter()
            .map(|request| summarize(&mut profiles, &request, request.from_user_id))
            .collect::<EngineResult<Vec<_>>>()?;
        let outgoing = self
            .graph
            .list_outgoing(user)
            .into_iter()
            .map(|request| summarize(&mut profiles, &request, request.to_user_id))
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(ConnectionsSummary {
            connections,
            incoming_requests: incoming,
            outgoing_requests: outgoing,
            unread_counts: self.unread.direct_counts(user, &connected),
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> EngineSnapshot {
        let graph = self.graph.snapshot();
        EngineSnapshot {
            taken_at: Some(self.clock.now()),
            next_request_id: graph.next_request_id,
            blocks: self.blocks.snapshot(),
            requests: graph.requests,
            connections: graph.connections,
            unread: self.unread.snapshot(),
        }
    }

    /// Load a snapshot into a freshly built engine. Blocks go first so that
    /// the graph and the tracker can repair anything that contradicts them.
    pub fn restore(&self, snapshot: EngineSnapshot) -> EngineResult<()> {
        if !self.snapshot().is_empty() {
            return Err(EngineError::InvalidOperation(
                "Snapshots can only be restored into an empty engine".into(),
            ));
        }

        let counts = (
            snapshot.blocks.len(),
            snapshot.requests.len(),
            snapshot.connections.len(),
            snapshot.unread.len(),
        );

        self.blocks.restore(snapshot.blocks);
        self.graph.restore(
            snapshot.next_request_id,
            snapshot.requests,
            snapshot.connections,
        );
        self.unread.restore(snapshot.unread);

        info!(
            blocks = counts.0,
            requests = counts.1,
            connections = counts.2,
            unread = counts.3,
            "Engine state restored"
        );
        Ok(())
    }

    /// Drop pair locks nobody is holding. Returns how many were dropped.
    pub fn purge_idle_locks(&self) -> usize {
        let purged = self.locks.purge_idle();
        if purged > 0 {
            debug!(purged, remaining = self.locks.len(), "Purged idle pair locks");
        }
        purged
    }

    /// Cross-check the structural invariants. Used by tests and by the
    /// server after a restore.
    pub fn check_invariants(&self) -> Vec<String> {
        let snapshot = self.snapshot();
        let mut violations = Vec::new();

        for connection in &snapshot.connections {
            let pair = connection.pair;
            if self.blocks.is_blocked(pair.low, pair.high) {
                violations.push(format!("blocked pair {pair} is connected"));
            }
        }

        for request in snapshot.requests.iter().filter(|r| r.is_pending()) {
            let Some(pair) = request.pair() else {
                violations.push(format!("request {} targets its sender", request.id));
                continue;
            };
            if self.blocks.is_blocked(pair.low, pair.high) {
                violations.push(format!("blocked pair {pair} has pending request"));
            }
            if snapshot.connections.iter().any(|c| c.pair == pair) {
                violations.push(format!("connected pair {pair} has pending request"));
            }
            let pending_for_pair = snapshot
                .requests
                .iter()
                .filter(|r| r.is_pending() && r.pair() == Some(pair))
                .count();
            if pending_for_pair > 1 {
                violations.push(format!("pair {pair} has {pending_for_pair} pending requests"));
            }
        }

        for entry in &snapshot.unread {
            if let UnreadSource::Direct(other) = entry.source() {
                if entry.count > 0 && self.blocks.is_blocked(entry.owner_id, other) {
                    violations.push(format!(
                        "user {} has unread messages from blocked user {other}",
                        entry.owner_id
                    ));
                }
            }
        }

        violations.sort();
        violations.dedup();
        for violation in &violations {
            warn!(%violation, "Engine invariant violated");
        }
        violations
    }
}

fn summarize(
    profiles: &mut ProfileCache<'_>,
    request: &ConnectionRequest,
    other: UserId,
) -> EngineResult<RequestSummary> {
    let profile = profiles.get(other)?;
    Ok(RequestSummary {
        request_id: request.id,
        user_id: other,
        display_name: profile.display_name,
        avatar_url: profile.avatar_url,
        campus_domain: profile.campus_domain,
        created_at: request.created_at,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use campuslink_shared::{Decision, EngineError, GroupId, RequestStatus, UnreadSource, UserId};

    use super::SocialEngine;
    use crate::clock::ManualClock;
    use crate::directory::{MemoryDirectory, UserProfile};
    use crate::models::Relationship;

    const A: UserId = UserId(1);
    const B: UserId = UserId(2);
    const C: UserId = UserId(3);
    const D: UserId = UserId(4);
    const CHESS: GroupId = GroupId(7);

    fn setup() -> (SocialEngine, Arc<MemoryDirectory>, Arc<ManualClock>) {
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_profile(UserProfile {
            user_id: A,
            display_name: "Alice".into(),
            avatar_url: Some("https://cdn.example.edu/a.png".into()),
            campus_domain: Some("example.edu".into()),
        });
        directory.add_user(B, "Bob");
        directory.add_user(C, "Carol");
        directory.add_user(D, "Dan");
        directory.add_group(CHESS, "Chess Club");
        directory.join(CHESS, A);

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        ));
        let engine = SocialEngine::with_clock(directory.clone(), directory.clone(), clock.clone());
        (engine, directory, clock)
    }

    #[test]
    fn test_request_accept_then_block_scenario() {
        let (engine, _, _) = setup();

        let id = engine.graph().request_connection(A, B).unwrap();
        engine.graph().respond(B, id, Decision::Accept).unwrap();
        assert_eq!(engine.graph().list_connections(A), vec![B]);
        assert_eq!(engine.graph().list_connections(B), vec![A]);

        engine
            .unread()
            .record_inbound(A, UnreadSource::Direct(B))
            .unwrap();
        engine.block(A, B).unwrap();

        assert!(engine.graph().list_connections(A).is_empty());
        assert!(engine.graph().list_connections(B).is_empty());
        assert_eq!(engine.unread().count(A, UnreadSource::Direct(B)), 0);
        assert_eq!(
            engine.graph().request_connection(B, A).unwrap_err(),
            EngineError::Blocked
        );
        assert!(engine.check_invariants().is_empty());
    }

    #[test]
    fn test_crossed_requests_leave_one_pending() {
        let (engine, _, _) = setup();

        let first = engine.graph().request_connection(A, B).unwrap();
        assert_eq!(
            engine.graph().request_connection(B, A).unwrap_err(),
            EngineError::AlreadyPending
        );

        assert_eq!(engine.graph().list_outgoing(A).len(), 1);
        assert_eq!(engine.graph().list_incoming(B)[0].id, first);
        assert!(engine.graph().list_outgoing(B).is_empty());
    }

    #[test]
    fn test_block_during_pending_declines_request() {
        let (engine, _, _) = setup();
        let id = engine.graph().request_connection(A, B).unwrap();

        engine.block(B, A).unwrap();

        let request = engine.graph().request(id).unwrap();
        assert_eq!(request.status, RequestStatus::Declined);
        assert!(engine.graph().list_incoming(B).is_empty());
        assert!(matches!(
            engine.graph().relationship(A, B),
            Relationship::None
        ));
        assert!(engine.check_invariants().is_empty());
    }

    #[test]
    fn test_connection_summary_shapes() {
        let (engine, _, clock) = setup();

        let id = engine.graph().request_connection(B, A).unwrap();
        engine.graph().respond(A, id, Decision::Accept).unwrap();
        clock.advance(Duration::minutes(1));
        engine.graph().request_connection(C, A).unwrap();
        engine.graph().request_connection(A, D).unwrap();
        engine
            .unread()
            .record_inbound(A, UnreadSource::Direct(B))
            .unwrap();

        let summary = engine.connection_summary(A).unwrap();
        assert_eq!(summary.connections.len(), 1);
        assert_eq!(summary.connections[0].id, B);
        assert_eq!(summary.connections[0].display_name, "Bob");

        assert_eq!(summary.incoming_requests.len(), 1);
        assert_eq!(summary.incoming_requests[0].user_id, C);
        assert_eq!(summary.incoming_requests[0].display_name, "Carol");

        assert_eq!(summary.outgoing_requests.len(), 1);
        assert_eq!(summary.outgoing_requests[0].user_id, D);

        assert_eq!(summary.unread_counts.get(&B), Some(&1));

        let from_b = engine.connection_summary(B).unwrap();
        assert_eq!(from_b.connections[0].display_name, "Alice");
        assert_eq!(
            from_b.connections[0].campus_domain.as_deref(),
            Some("example.edu")
        );
    }

    #[test]
    fn test_blocked_users_carry_profiles() {
        let (engine, _, clock) = setup();
        engine.block(A, B).unwrap();
        clock.advance(Duration::seconds(30));
        engine.block(A, UserId(99)).unwrap();

        let blocked = engine.blocked_users(A).unwrap();
        assert_eq!(blocked.len(), 2);
        assert_eq!(blocked[0].user_id, UserId(99));
        assert_eq!(blocked[0].display_name, "Unknown User");
        assert_eq!(blocked[1].display_name, "Bob");
        assert!(engine.blocked_users(B).unwrap().is_empty());
    }

    #[test]
    fn test_feed_scenario_request_and_messages() {
        let (engine, _, _) = setup();
        engine.graph().request_connection(C, A).unwrap();
        engine
            .unread()
            .record_inbound(A, UnreadSource::Direct(D))
            .unwrap();
        engine
            .unread()
            .record_inbound(A, UnreadSource::Direct(D))
            .unwrap();

        let feed = engine.notifications().feed_for(A).unwrap();
        let ids: Vec<&str> = feed.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["req-3", "msg-4"]);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let (engine, directory, _) = setup();
        let accepted = engine.graph().request_connection(A, B).unwrap();
        engine.graph().respond(B, accepted, Decision::Accept).unwrap();
        let pending = engine.graph().request_connection(C, A).unwrap();
        engine.block(D, A).unwrap();
        engine
            .unread()
            .record_inbound(A, UnreadSource::Group(CHESS))
            .unwrap();

        let snapshot = engine.snapshot();
        assert!(!snapshot.is_empty());

        let restored = SocialEngine::new(directory.clone(), directory);
        restored.restore(snapshot).unwrap();

        assert_eq!(restored.graph().list_connections(A), vec![B]);
        assert_eq!(restored.graph().list_incoming(A)[0].id, pending);
        assert!(restored.blocks().has_blocked(D, A));
        assert_eq!(restored.unread().count(A, UnreadSource::Group(CHESS)), 1);
        assert!(restored.check_invariants().is_empty());

        let next = restored.graph().request_connection(A, UserId(50)).unwrap();
        assert!(next.0 > pending.0);
    }

    #[test]
    fn test_restore_repairs_contradictions() {
        let (engine, directory, _) = setup();
        let id = engine.graph().request_connection(A, B).unwrap();
        engine.graph().respond(B, id, Decision::Accept).unwrap();
        engine
            .unread()
            .record_inbound(A, UnreadSource::Direct(B))
            .unwrap();

        let mut snapshot = engine.snapshot();
        snapshot.blocks.push(crate::models::Block {
            blocker_id: B,
            blocked_id: A,
            created_at: Utc::now(),
        });

        let restored = SocialEngine::new(directory.clone(), directory);
        restored.restore(snapshot).unwrap();

        assert!(restored.graph().list_connections(A).is_empty());
        assert_eq!(restored.unread().count(A, UnreadSource::Direct(B)), 0);
        assert!(restored.check_invariants().is_empty());
    }

    #[test]
    fn test_restore_into_populated_engine_rejected() {
        let (engine, _, _) = setup();
        engine.block(A, B).unwrap();
        let snapshot = engine.snapshot();

        assert!(matches!(
            engine.restore(snapshot).unwrap_err(),
            EngineError::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_purge_idle_locks() {
        let (engine, _, _) = setup();
        engine.graph().request_connection(A, B).unwrap();
        engine.block(C, D).unwrap();

        assert!(engine.purge_idle_locks() >= 2);
        assert_eq!(engine.purge_idle_locks(), 0);
    }

    #[test]
    fn test_concurrent_mixed_operations_keep_invariants() {
        let (engine, _, _) = setup();
        let users: Vec<UserId> = (10..18).map(UserId).collect();

        std::thread::scope(|scope| {
            for (i, &me) in users.iter().enumerate() {
                let engine = &engine;
                let users = &users;
                scope.spawn(move || {
                    for round in 0..40 {
                        let other = users[(i + round + 1) % users.len()];
                        if other == me {
                            continue;
                        }
                        match round % 5 {
                            0 => {
                                let _ = engine.graph().request_connection(me, other);
                            }
                            1 => {
                                for request in engine.graph().list_incoming(me) {
                                    let _ = engine.graph().respond(me, request.id, Decision::Accept);
                                }
                            }
                            2 => {
                                let _ = engine.unread().record_inbound(me, UnreadSource::Direct(other));
                            }
                            3 => {
                                let _ = engine.block(me, other);
                            }
                            _ => {
                                let _ = engine.unblock(me, other);
                            }
                        }
                    }
                });
            }
        });

        assert!(engine.check_invariants().is_empty());
    }
}
