//! SQLite-backed implementations of the engine's directory ports.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use campuslink_engine::{GroupDirectory, ProfileDirectory, UserProfile};
use campuslink_shared::{EngineResult, GroupId, UserId};

use crate::database::Database;

/// Reads profiles and group memberships from the shared database handle.
/// Store failures surface to the engine as `Unavailable`.
#[derive(Clone)]
pub struct SqliteDirectory {
    db: Arc<Mutex<Database>>,
}

impl SqliteDirectory {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

impl ProfileDirectory for SqliteDirectory {
    fn profile(&self, user: UserId) -> EngineResult<Option<UserProfile>> {
        Ok(self.db.lock().get_profile(user)?)
    }
}

impl GroupDirectory for SqliteDirectory {
    fn groups_of(&self, user: UserId) -> EngineResult<BTreeSet<GroupId>> {
        Ok(self.db.lock().list_groups_for_user(user)?)
    }

    fn group_name(&self, group: GroupId) -> EngineResult<Option<String>> {
        Ok(self.db.lock().get_group_name(group)?)
    }

    fn is_member(&self, group: GroupId, user: UserId) -> EngineResult<bool> {
        Ok(self.db.lock().is_group_member(group, user)?)
    }
}

#[cfg(test)]
mod tests {
    use campuslink_engine::SocialEngine;
    use campuslink_shared::{EngineError, UnreadSource};

    use super::*;

    fn directory() -> (SqliteDirectory, Arc<Mutex<Database>>) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        {
            let db = db.lock();
            db.upsert_profile(&UserProfile {
                user_id: UserId(2),
                display_name: "Bea".into(),
                avatar_url: None,
                campus_domain: None,
            })
            .unwrap();
            db.upsert_group(GroupId(5), "Film Society").unwrap();
            db.add_group_member(GroupId(5), UserId(1)).unwrap();
        }
        (SqliteDirectory::new(db.clone()), db)
    }

    #[test]
    fn engine_reads_through_sqlite() {
        let (directory, db) = directory();
        let directory = Arc::new(directory);
        let engine = SocialEngine::new(directory.clone(), directory);

        engine
            .unread()
            .record_inbound(UserId(1), UnreadSource::Group(GroupId(5)))
            .unwrap();
        engine
            .unread()
            .record_inbound(UserId(1), UnreadSource::Direct(UserId(2)))
            .unwrap();

        let feed = engine.notifications().feed_for(UserId(1)).unwrap();
        let messages: Vec<&str> = feed.iter().map(|item| item.message.as_str()).collect();
        assert!(messages.contains(&"Bea sent you 1 new message"));
        assert!(messages.contains(&"1 new message in Film Society"));

        db.lock().remove_group_member(GroupId(5), UserId(1)).unwrap();
        let err = engine
            .unread()
            .record_inbound(UserId(1), UnreadSource::Group(GroupId(5)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn store_failure_maps_to_unavailable() {
        let (directory, db) = directory();
        db.lock()
            .conn()
            .execute_batch("DROP TABLE group_members;")
            .unwrap();

        let err = directory.groups_of(UserId(1)).unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
