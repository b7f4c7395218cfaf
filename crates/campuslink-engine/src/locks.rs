//! Per-pair lock table.
//!
//! Every relationship mutation on an unordered pair `{a, b}` runs while
//! holding that pair's lock, so a block, a request and a response on the same
//! pair never interleave, while unrelated pairs proceed in parallel.
//!
//! Lock order: a pair lock is always taken before any map shard lock, and at
//! most one pair lock is held at a time.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

use campuslink_shared::PairKey;

/// Proof that the holder owns the lock for `pair`. Internal cascade steps
/// take `&PairGuard` instead of locking again.
pub struct PairGuard {
    pair: PairKey,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl PairGuard {
    pub fn pair(&self) -> PairKey {
        self.pair
    }
}

#[derive(Default)]
pub struct PairLocks {
    slots: DashMap<PairKey, Arc<Mutex<()>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the pair's lock is free and take it.
    pub fn lock(&self, pair: PairKey) -> PairGuard {
        // The shard guard must be released before waiting on the pair lock.
        let slot = self
            .slots
            .entry(pair)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        PairGuard {
            pair,
            _guard: slot.lock_arc(),
        }
    }

    /// Drop slots nobody holds or waits on. Returns how many were removed.
    pub fn purge_idle(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
