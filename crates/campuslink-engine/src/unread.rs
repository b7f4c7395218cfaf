//! Per-(owner, source) unread counters.
//!
//! Counters grow by one per inbound message and drop to zero when the owner
//! reads the conversation. Entries are never deleted, so `last_event_at`
//! survives a read.
//!
//! Direct increments run under the pair lock so they serialize with a block
//! on the same pair: once `block` returns, no increment for that pair can
//! land. Everything else is serialized per entry by the map.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use campuslink_shared::{EngineError, EngineResult, GroupId, PairKey, UnreadSource, UserId};

use crate::blocks::BlockRegistry;
use crate::clock::Clock;
use crate::directory::GroupDirectory;
use crate::locks::{PairGuard, PairLocks};
use crate::models::UnreadEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EntryKey {
    owner: UserId,
    source: UnreadSource,
}

pub struct UnreadTracker {
    blocks: Arc<BlockRegistry>,
    locks: Arc<PairLocks>,
    groups: Arc<dyn GroupDirectory>,
    clock: Arc<dyn Clock>,
    entries: DashMap<EntryKey, UnreadEntry>,
    /// owner -> sources that have an entry
    sources: DashMap<UserId, BTreeSet<UnreadSource>>,
}

impl UnreadTracker {
    pub fn new(
        blocks: Arc<BlockRegistry>,
        locks: Arc<PairLocks>,
        groups: Arc<dyn GroupDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            blocks,
            locks,
            groups,
            clock,
            entries: DashMap::new(),
            sources: DashMap::new(),
        }
    }

    /// Count one inbound message for `owner`.
    ///
    /// Direct messages across a blocked pair are dropped silently: delivery
    /// is gated upstream and this is a second line. Group messages require
    /// `owner` to be a current member of the group.
    pub fn record_inbound(&self, owner: UserId, source: UnreadSource) -> EngineResult<()> {
        match source {
            UnreadSource::Direct(counterpart) => {
                let pair = PairKey::new(owner, counterpart).ok_or_else(|| {
                    EngineError::InvalidOperation("A user cannot message themselves".into())
                })?;
                let _guard = self.locks.lock(pair);

                if self.blocks.is_blocked(owner, counterpart) {
                    debug!(%owner, %counterpart, "Inbound direct message dropped: blocked");
                    return Ok(());
                }
                self.bump(owner, source);
            }
            UnreadSource::Group(group) => {
                if !self.groups.is_member(group, owner)? {
                    return Err(EngineError::Forbidden(format!(
                        "User {owner} is not a member of group {group}"
                    )));
                }
                self.bump(owner, source);
            }
        }
        Ok(())
    }

    /// Reset the counter to zero. Returns how many unread messages were
    /// cleared; absent or already-zero entries clear nothing.
    pub fn mark_read(&self, owner: UserId, source: UnreadSource) -> u32 {
        let cleared = match self.entries.get_mut(&EntryKey { owner, source }) {
            Some(mut entry) => std::mem::take(&mut entry.count),
            None => 0,
        };
        if cleared > 0 {
            debug!(
                %owner,
                source_type = source.source_type().as_str(),
                source_id = source.source_id(),
                cleared,
                "Marked read"
            );
        }
        cleared
    }

    /// Zero every counter `owner` has. Returns how many entries changed.
    pub fn mark_all_read(&self, owner: UserId) -> usize {
        self.sources_of(owner)
            .into_iter()
            .filter(|source| self.mark_read(owner, *source) > 0)
            .count()
    }

    /// Non-zero entries for `owner`, most recent first. Group entries for
    /// groups the owner has left are not reported.
    pub fn unread_for(&self, owner: UserId) -> EngineResult<Vec<UnreadEntry>> {
        let sources = self.sources_of(owner);
        let groups = if sources.iter().any(|s| matches!(s, UnreadSource::Group(_))) {
            self.groups.groups_of(owner)?
        } else {
            BTreeSet::new()
        };

        let mut entries: Vec<UnreadEntry> = sources
            .into_iter()
            .filter(|source| match source {
                UnreadSource::Direct(_) => true,
                UnreadSource::Group(group) => groups.contains(group),
            })
            .filter_map(|source| self.entry(owner, source))
            .filter(|entry| entry.count > 0)
            .collect();

        entries.sort_by(|a, b| {
            b.last_event_at
                .cmp(&a.last_event_at)
                .then(a.source().cmp(&b.source()))
        });
        Ok(entries)
    }

    /// Number of distinct users with unread direct messages for `owner`.
    pub fn people_with_unread(&self, owner: UserId) -> usize {
        self.sources_of(owner)
            .into_iter()
            .filter(|source| matches!(source, UnreadSource::Direct(_)))
            .filter(|source| self.count(owner, *source) > 0)
            .count()
    }

    pub fn count(&self, owner: UserId, source: UnreadSource) -> u32 {
        self.entries
            .get(&EntryKey { owner, source })
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Direct unread count for each of `counterparts`, zero included.
    pub fn direct_counts(&self, owner: UserId, counterparts: &[UserId]) -> BTreeMap<UserId, u32> {
        counterparts
            .iter()
            .map(|other| (*other, self.count(owner, UnreadSource::Direct(*other))))
            .collect()
    }

    /// Non-zero unread counts for the groups `owner` currently belongs to.
    pub fn group_counts(&self, owner: UserId) -> EngineResult<BTreeMap<GroupId, u32>> {
        Ok(self
            .groups
            .groups_of(owner)?
            .into_iter()
            .map(|group| (group, self.count(owner, UnreadSource::Group(group))))
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    /// Zero the direct counters between a pair whose block is being
    /// recorded. The caller already holds the pair's lock.
    pub(crate) fn suppress_locked(&self, guard: &PairGuard) {
        let pair = guard.pair();
        for (owner, other) in [(pair.low, pair.high), (pair.high, pair.low)] {
            let source = UnreadSource::Direct(other);
            if let Some(mut entry) = self.entries.get_mut(&EntryKey { owner, source }) {
                entry.count = 0;
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<UnreadEntry> {
        let mut entries: Vec<UnreadEntry> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by_key(|e| (e.owner_id, e.source()));
        entries
    }

    pub(crate) fn restore(&self, entries: Vec<UnreadEntry>) {
        for mut entry in entries {
            let source = entry.source();
            if let UnreadSource::Direct(other) = source {
                if other == entry.owner_id {
                    continue;
                }
                if self.blocks.is_blocked(entry.owner_id, other) {
                    entry.count = 0;
                }
            }
            let owner = entry.owner_id;
            self.entries.insert(EntryKey { owner, source }, entry);
            self.sources.entry(owner).or_default().insert(source);
        }
    }

    fn bump(&self, owner: UserId, source: UnreadSource) {
        let now = self.clock.now();
        let count = {
            let mut entry = self
                .entries
                .entry(EntryKey { owner, source })
                .or_insert_with(|| UnreadEntry {
                    owner_id: owner,
                    source_type: source.source_type(),
                    source_id: source.source_id(),
                    count: 0,
                    last_event_at: now,
                });
            entry.count = entry.count.saturating_add(1);
            entry.last_event_at = now;
            entry.count
        };
        self.sources.entry(owner).or_default().insert(source);

        debug!(
            %owner,
            source_type = source.source_type().as_str(),
            source_id = source.source_id(),
            count,
            "Inbound message counted"
        );
    }

    fn entry(&self, owner: UserId, source: UnreadSource) -> Option<UnreadEntry> {
        self.entries
            .get(&EntryKey { owner, source })
            .map(|entry| entry.clone())
    }

    fn sources_of(&self, owner: UserId) -> BTreeSet<UnreadSource> {
        self.sources
            .get(&owner)
            .map(|set| set.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use campuslink_shared::{EngineError, GroupId, UnreadSource, UserId};

    use crate::directory::MemoryDirectory;
    use crate::engine::SocialEngine;

    const A: UserId = UserId(1);
    const B: UserId = UserId(2);
    const D: UserId = UserId(4);
    const CHESS: GroupId = GroupId(77);

    fn setup() -> (SocialEngine, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_group(CHESS, "Chess Club");
        directory.join(CHESS, B);
        let engine = SocialEngine::new(directory.clone(), directory.clone());
        (engine, directory)
    }

    #[test]
    fn test_record_n_times_counts_n() {
        let (engine, _) = setup();
        for _ in 0..5 {
            engine
                .unread()
                .record_inbound(B, UnreadSource::Direct(A))
                .unwrap();
        }
        assert_eq!(engine.unread().count(B, UnreadSource::Direct(A)), 5);
    }

    #[test]
    fn test_three_messages_then_mark_read() {
        let (engine, _) = setup();
        let unread = engine.unread();
        for _ in 0..3 {
            unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();
        }

        let entries = unread.unread_for(B).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 3);
        assert_eq!(entries[0].source(), UnreadSource::Direct(A));
        assert_eq!(unread.people_with_unread(B), 1);

        assert_eq!(unread.mark_read(B, UnreadSource::Direct(A)), 3);
        assert_eq!(unread.count(B, UnreadSource::Direct(A)), 0);
        assert_eq!(unread.people_with_unread(B), 0);
        assert!(unread.unread_for(B).unwrap().is_empty());
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let (engine, _) = setup();
        let unread = engine.unread();
        unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();

        assert_eq!(unread.mark_read(B, UnreadSource::Direct(A)), 1);
        assert_eq!(unread.count(B, UnreadSource::Direct(A)), 0);
        assert_eq!(unread.mark_read(B, UnreadSource::Direct(A)), 0);
        assert_eq!(unread.count(B, UnreadSource::Direct(A)), 0);
        // Never-seen source
        assert_eq!(unread.mark_read(B, UnreadSource::Direct(D)), 0);
    }

    #[test]
    fn test_counter_restarts_after_read() {
        let (engine, _) = setup();
        let unread = engine.unread();
        unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();
        unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();
        unread.mark_read(B, UnreadSource::Direct(A));
        unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();

        assert_eq!(unread.count(B, UnreadSource::Direct(A)), 1);
    }

    #[test]
    fn test_people_with_unread_counts_people_not_messages() {
        let (engine, _) = setup();
        let unread = engine.unread();
        for _ in 0..4 {
            unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();
        }
        unread.record_inbound(B, UnreadSource::Direct(D)).unwrap();
        unread.record_inbound(B, UnreadSource::Group(CHESS)).unwrap();

        assert_eq!(unread.people_with_unread(B), 2);
    }

    #[test]
    fn test_blocked_direct_inbound_is_dropped() {
        let (engine, _) = setup();
        engine.block(A, B).unwrap();

        engine
            .unread()
            .record_inbound(B, UnreadSource::Direct(A))
            .unwrap();
        assert_eq!(engine.unread().count(B, UnreadSource::Direct(A)), 0);
    }

    #[test]
    fn test_self_message_rejected() {
        let (engine, _) = setup();
        let err = engine
            .unread()
            .record_inbound(A, UnreadSource::Direct(A))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
    }

    #[test]
    fn test_group_inbound_requires_membership() {
        let (engine, directory) = setup();
        let unread = engine.unread();

        let err = unread
            .record_inbound(A, UnreadSource::Group(CHESS))
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        directory.join(CHESS, A);
        unread.record_inbound(A, UnreadSource::Group(CHESS)).unwrap();
        assert_eq!(unread.group_counts(A).unwrap().get(&CHESS), Some(&1));
    }

    #[test]
    fn test_left_group_hidden_from_views() {
        let (engine, directory) = setup();
        let unread = engine.unread();
        unread.record_inbound(B, UnreadSource::Group(CHESS)).unwrap();
        assert_eq!(unread.unread_for(B).unwrap().len(), 1);

        directory.leave(CHESS, B);
        assert!(unread.unread_for(B).unwrap().is_empty());
        assert!(unread.group_counts(B).unwrap().is_empty());
        // Leavers can still clear the stale counter.
        assert_eq!(unread.mark_read(B, UnreadSource::Group(CHESS)), 1);
    }

    #[test]
    fn test_mark_all_read() {
        let (engine, _) = setup();
        let unread = engine.unread();
        unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();
        unread.record_inbound(B, UnreadSource::Direct(D)).unwrap();
        unread.record_inbound(B, UnreadSource::Group(CHESS)).unwrap();

        assert_eq!(unread.mark_all_read(B), 3);
        assert!(unread.unread_for(B).unwrap().is_empty());
        assert_eq!(unread.mark_all_read(B), 0);
    }

    #[test]
    fn test_direct_counts_include_zeroes() {
        let (engine, _) = setup();
        let unread = engine.unread();
        unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();

        let counts = unread.direct_counts(B, &[A, D]);
        assert_eq!(counts.get(&A), Some(&1));
        assert_eq!(counts.get(&D), Some(&0));
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let (engine, _) = setup();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let unread = engine.unread();
                scope.spawn(move || {
                    for _ in 0..250 {
                        unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();
                    }
                });
            }
        });

        assert_eq!(engine.unread().count(B, UnreadSource::Direct(A)), 2000);
    }

    #[test]
    fn test_block_racing_inbound_leaves_zero() {
        let (engine, _) = setup();

        std::thread::scope(|scope| {
            let unread = engine.unread();
            scope.spawn(move || {
                for _ in 0..500 {
                    unread.record_inbound(B, UnreadSource::Direct(A)).unwrap();
                }
            });
            let engine = &engine;
            scope.spawn(move || engine.block(A, B).unwrap());
        });

        assert_eq!(engine.unread().count(B, UnreadSource::Direct(A)), 0);
    }
}
