//! CRUD operations for user profiles.

use rusqlite::{params, OptionalExtension};

use campuslink_engine::UserProfile;
use campuslink_shared::UserId;

use crate::database::{get_id, sql_id, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Insert or replace a profile.
    pub fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO profiles (user_id, display_name, avatar_url, campus_domain)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name  = excluded.display_name,
                avatar_url    = excluded.avatar_url,
                campus_domain = excluded.campus_domain",
            params![
                sql_id(profile.user_id.0),
                profile.display_name,
                profile.avatar_url,
                profile.campus_domain,
            ],
        )?;
        Ok(())
    }

    /// Fetch a profile, `None` when the user has none.
    pub fn get_profile(&self, user: UserId) -> Result<Option<UserProfile>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT user_id, display_name, avatar_url, campus_domain
                 FROM profiles
                 WHERE user_id = ?1",
                params![sql_id(user.0)],
                row_to_profile,
            )
            .optional()?)
    }

    /// Delete a profile.  Returns `true` if a row was deleted.
    pub fn delete_profile(&self, user: UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM profiles WHERE user_id = ?1", params![sql_id(user.0)])?;
        Ok(affected > 0)
    }

    /// Like [`Database::get_profile`] but a missing profile is an error.
    pub fn require_profile(&self, user: UserId) -> Result<UserProfile> {
        self.get_profile(user)?.ok_or(StoreError::NotFound)
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        user_id: UserId(get_id(row, 0)?),
        display_name: row.get(1)?,
        avatar_url: row.get(2)?,
        campus_domain: row.get(3)?,
    })
}
