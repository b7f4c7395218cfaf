//! v001 -- Initial schema creation.
//!
//! Directory tables (`profiles`, `groups`, `group_members`) and the engine
//! snapshot tables (`blocks`, `connection_requests`, `connections`,
//! `unread_entries`, `engine_meta`). Id columns hold the `u64` bit pattern
//! written by `database::sql_id`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    user_id       INTEGER PRIMARY KEY NOT NULL,
    display_name  TEXT NOT NULL,
    avatar_url    TEXT,
    campus_domain TEXT
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id    INTEGER PRIMARY KEY NOT NULL,
    name  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id  INTEGER NOT NULL,              -- FK -> groups(id)
    user_id   INTEGER NOT NULL,
    joined_at TEXT NOT NULL,                 -- RFC-3339

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Blocks
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blocks (
    blocker_id INTEGER NOT NULL,
    blocked_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (blocker_id, blocked_id),
    CHECK (blocker_id <> blocked_id)
);

-- ----------------------------------------------------------------
-- Connection requests (pending and resolved)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS connection_requests (
    id           INTEGER PRIMARY KEY NOT NULL,
    from_user_id INTEGER NOT NULL,
    to_user_id   INTEGER NOT NULL,
    status       TEXT NOT NULL,              -- PENDING | ACCEPTED | DECLINED | CANCELLED
    created_at   TEXT NOT NULL,
    resolved_at  TEXT,

    CHECK (from_user_id <> to_user_id)
);

CREATE INDEX IF NOT EXISTS idx_requests_to_status
    ON connection_requests(to_user_id, status);

-- ----------------------------------------------------------------
-- Connections (undirected, stored once per canonical pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS connections (
    low_id         INTEGER NOT NULL,
    high_id        INTEGER NOT NULL,
    established_at TEXT NOT NULL,

    PRIMARY KEY (low_id, high_id),
    CHECK (low_id <> high_id)
);

-- ----------------------------------------------------------------
-- Unread counters
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS unread_entries (
    owner_id      INTEGER NOT NULL,
    source_type   TEXT NOT NULL,             -- DIRECT | GROUP
    source_id     INTEGER NOT NULL,
    count         INTEGER NOT NULL DEFAULT 0,
    last_event_at TEXT NOT NULL,

    PRIMARY KEY (owner_id, source_type, source_id),
    CHECK (count >= 0)
);

-- ----------------------------------------------------------------
-- Engine metadata (request id sequence, snapshot time)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS engine_meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the v001 migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
