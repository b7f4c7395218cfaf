//! Moving engine state in and out of the database.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use campuslink_engine::SocialEngine;
use campuslink_store::Database;

/// Restore the last saved snapshot into a freshly built engine.
pub fn load(engine: &SocialEngine, db: &Mutex<Database>) -> anyhow::Result<()> {
    let snapshot = db.lock().load_snapshot().context("loading engine snapshot")?;
    if snapshot.is_empty() {
        info!("No saved engine state, starting empty");
        return Ok(());
    }

    let taken_at = snapshot.taken_at;
    engine.restore(snapshot)?;

    let violations = engine.check_invariants();
    if !violations.is_empty() {
        warn!(count = violations.len(), "Restored state still violates invariants");
    }
    info!(?taken_at, "Engine state loaded");
    Ok(())
}

/// Take a snapshot and write it out. The engine is read without holding the
/// database lock.
pub fn save(engine: &SocialEngine, db: &Mutex<Database>) -> anyhow::Result<()> {
    let snapshot = engine.snapshot();
    db.lock()
        .save_snapshot(&snapshot)
        .context("saving engine snapshot")?;
    debug!(taken_at = ?snapshot.taken_at, "Engine state saved");
    Ok(())
}

/// [`save`] on the blocking pool.
pub async fn save_blocking(
    engine: Arc<SocialEngine>,
    db: Arc<Mutex<Database>>,
) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || save(&engine, &db)).await?
}
