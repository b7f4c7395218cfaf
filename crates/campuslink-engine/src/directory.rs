//! Outbound ports for the collaborators the engine reads from but does not
//! own: the profile store (display data) and the group-membership service.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use campuslink_shared::constants::UNKNOWN_USER_NAME;
use campuslink_shared::{EngineResult, GroupId, UserId};

/// Display data for a user, owned by the profile service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub campus_domain: Option<String>,
}

pub trait ProfileDirectory: Send + Sync {
    /// `Ok(None)` when the user has no profile; `Err` when the lookup failed.
    fn profile(&self, user: UserId) -> EngineResult<Option<UserProfile>>;
}

pub trait GroupDirectory: Send + Sync {
    /// Groups the user currently belongs to.
    fn groups_of(&self, user: UserId) -> EngineResult<BTreeSet<GroupId>>;

    fn group_name(&self, group: GroupId) -> EngineResult<Option<String>>;

    fn is_member(&self, group: GroupId, user: UserId) -> EngineResult<bool> {
        Ok(self.groups_of(user)?.contains(&group))
    }
}

#[derive(Debug, Default)]
struct GroupRecord {
    name: String,
    members: BTreeSet<UserId>,
}

/// In-memory directory used by tests and embedded setups.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
    groups: RwLock<HashMap<GroupId, GroupRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserId, display_name: &str) {
        self.add_profile(UserProfile {
            user_id: user,
            display_name: display_name.to_string(),
            avatar_url: None,
            campus_domain: None,
        });
    }

    pub fn add_profile(&self, profile: UserProfile) {
        self.profiles.write().insert(profile.user_id, profile);
    }

    pub fn add_group(&self, group: GroupId, name: &str) {
        self.groups.write().entry(group).or_default().name = name.to_string();
    }

    pub fn join(&self, group: GroupId, user: UserId) {
        self.groups.write().entry(group).or_default().members.insert(user);
    }

    pub fn leave(&self, group: GroupId, user: UserId) {
        if let Some(record) = self.groups.write().get_mut(&group) {
            record.members.remove(&user);
        }
    }
}

impl ProfileDirectory for MemoryDirectory {
    fn profile(&self, user: UserId) -> EngineResult<Option<UserProfile>> {
        Ok(self.profiles.read().get(&user).cloned())
    }
}

impl GroupDirectory for MemoryDirectory {
    fn groups_of(&self, user: UserId) -> EngineResult<BTreeSet<GroupId>> {
        Ok(self
            .groups
            .read()
            .iter()
            .filter(|(_, record)| record.members.contains(&user))
            .map(|(id, _)| *id)
            .collect())
    }

    fn group_name(&self, group: GroupId) -> EngineResult<Option<String>> {
        Ok(self
            .groups
            .read()
            .get(&group)
            .map(|record| record.name.clone())
            .filter(|name| !name.is_empty()))
    }
}

/// Per-call memo over a [`ProfileDirectory`], so a feed or summary that
/// mentions the same user twice looks them up once.
pub(crate) struct ProfileCache<'a> {
    directory: &'a dyn ProfileDirectory,
    seen: HashMap<UserId, UserProfile>,
}

impl<'a> ProfileCache<'a> {
    pub(crate) fn new(directory: &'a dyn ProfileDirectory) -> Self {
        Self {
            directory,
            seen: HashMap::new(),
        }
    }

    /// The user's profile, or a placeholder when the directory has none.
    pub(crate) fn get(&mut self, user: UserId) -> EngineResult<UserProfile> {
        if let Some(profile) = self.seen.get(&user) {
            return Ok(profile.clone());
        }
        let profile = self.directory.profile(user)?.unwrap_or_else(|| UserProfile {
            user_id: user,
            display_name: UNKNOWN_USER_NAME.to_string(),
            avatar_url: None,
            campus_domain: None,
        });
        self.seen.insert(user, profile.clone());
        Ok(profile)
    }
}
