//! Group records and memberships.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use campuslink_shared::{GroupId, UserId};

use crate::database::{get_id, sql_id, Database};
use crate::error::Result;

impl Database {
    /// Insert a group or rename an existing one.
    pub fn upsert_group(&self, group: GroupId, name: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO groups (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![sql_id(group.0), name],
        )?;
        Ok(())
    }

    pub fn get_group_name(&self, group: GroupId) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT name FROM groups WHERE id = ?1",
                params![sql_id(group.0)],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Add `user` to `group`.  Joining twice is a no-op.
    pub fn add_group_member(&self, group: GroupId, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![sql_id(group.0), sql_id(user.0), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Returns `true` if the user was a member.
    pub fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![sql_id(group.0), sql_id(user.0)],
        )?;
        Ok(affected > 0)
    }

    pub fn list_groups_for_user(&self, user: UserId) -> Result<BTreeSet<GroupId>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id FROM group_members
             WHERE user_id = ?1",
        )?;

        let rows = stmt.query_map(params![sql_id(user.0)], |row| get_id(row, 0))?;

        let mut groups = BTreeSet::new();
        for row in rows {
            groups.insert(GroupId(row?));
        }
        Ok(groups)
    }

    pub fn is_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![sql_id(group.0), sql_id(user.0)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
