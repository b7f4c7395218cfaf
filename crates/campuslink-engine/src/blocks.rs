//! Directional block relations.
//!
//! A block in either direction overrides every other relationship state
//! between two users. Recording a block tears down the pair's connection or
//! pending request and zeroes their direct unread counters, all under the
//! pair's lock, so no reader of the pair ever observes a block next to a live
//! edge.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use campuslink_shared::{EngineError, EngineResult, PairKey, UserId};

use crate::clock::Clock;
use crate::graph::ConnectionGraph;
use crate::locks::PairLocks;
use crate::models::Block;
use crate::unread::UnreadTracker;

pub struct BlockRegistry {
    locks: Arc<PairLocks>,
    clock: Arc<dyn Clock>,
    /// blocker -> blocked -> block
    by_blocker: DashMap<UserId, BTreeMap<UserId, Block>>,
}

impl BlockRegistry {
    pub fn new(locks: Arc<PairLocks>, clock: Arc<dyn Clock>) -> Self {
        Self {
            locks,
            clock,
            by_blocker: DashMap::new(),
        }
    }

    /// Record `blocker -> blocked` and cascade into the graph and the unread
    /// tracker. Blocking an already-blocked user is a successful no-op.
    pub fn block(
        &self,
        blocker: UserId,
        blocked: UserId,
        graph: &ConnectionGraph,
        unread: &UnreadTracker,
    ) -> EngineResult<()> {
        let pair = PairKey::new(blocker, blocked)
            .ok_or_else(|| EngineError::InvalidOperation("Cannot block yourself".into()))?;

        let guard = self.locks.lock(pair);

        if self.has_blocked(blocker, blocked) {
            debug!(%blocker, %blocked, "Block already recorded");
            return Ok(());
        }

        let block = Block {
            blocker_id: blocker,
            blocked_id: blocked,
            created_at: self.clock.now(),
        };
        self.by_blocker
            .entry(blocker)
            .or_default()
            .insert(blocked, block);

        graph.sever_locked(&guard);
        unread.suppress_locked(&guard);

        info!(%blocker, %blocked, "User blocked");
        Ok(())
    }

    /// Remove `blocker -> blocked` only. Earlier connections and requests are
    /// not restored. Absent blocks are a no-op.
    pub fn unblock(&self, blocker: UserId, blocked: UserId) -> EngineResult<()> {
        let Some(pair) = PairKey::new(blocker, blocked) else {
            return Ok(());
        };

        let _guard = self.locks.lock(pair);

        let removed = match self.by_blocker.get_mut(&blocker) {
            Some(mut targets) => targets.remove(&blocked).is_some(),
            None => false,
        };
        self.by_blocker
            .remove_if(&blocker, |_, targets| targets.is_empty());

        if removed {
            info!(%blocker, %blocked, "User unblocked");
        } else {
            debug!(%blocker, %blocked, "Unblock for absent block");
        }
        Ok(())
    }

    /// True when a block exists in either direction.
    pub fn is_blocked(&self, a: UserId, b: UserId) -> bool {
        self.has_blocked(a, b) || self.has_blocked(b, a)
    }

    /// True when `blocker` has blocked `blocked` (one direction only).
    pub fn has_blocked(&self, blocker: UserId, blocked: UserId) -> bool {
        self.by_blocker
            .get(&blocker)
            .map(|targets| targets.contains_key(&blocked))
            .unwrap_or(false)
    }

    /// Blocks created by `blocker`, most recent first.
    pub fn blocked_by(&self, blocker: UserId) -> Vec<Block> {
        let mut blocks: Vec<Block> = self
            .by_blocker
            .get(&blocker)
            .map(|targets| targets.values().cloned().collect())
            .unwrap_or_default();
        blocks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(a.blocked_id.cmp(&b.blocked_id))
        });
        blocks
    }

    pub(crate) fn snapshot(&self) -> Vec<Block> {
        let mut blocks: Vec<Block> = self
            .by_blocker
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect();
        blocks.sort_by_key(|b| (b.blocker_id, b.blocked_id));
        blocks
    }

    pub(crate) fn restore(&self, blocks: Vec<Block>) {
        for block in blocks {
            if block.blocker_id == block.blocked_id {
                continue;
            }
            self.by_blocker
                .entry(block.blocker_id)
                .or_default()
                .insert(block.blocked_id, block);
        }
    }
}
