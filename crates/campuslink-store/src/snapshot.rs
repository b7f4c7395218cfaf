//! Persisting and loading [`EngineSnapshot`]s.
//!
//! A save replaces the previous snapshot wholesale inside one transaction,
//! so a crash mid-save leaves the last complete snapshot in place.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use campuslink_engine::{Block, Connection, ConnectionRequest, EngineSnapshot, UnreadEntry};
use campuslink_shared::{PairKey, RequestId, RequestStatus, SourceType, UserId};

use crate::database::{conversion_error, get_id, get_timestamp, sql_id, Database};
use crate::error::{Result, StoreError};

const META_NEXT_REQUEST_ID: &str = "next_request_id";
const META_TAKEN_AT: &str = "snapshot_taken_at";

impl Database {
    /// Replace the stored snapshot with `snapshot`.
    pub fn save_snapshot(&mut self, snapshot: &EngineSnapshot) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute_batch(
            "DELETE FROM blocks;
             DELETE FROM connection_requests;
             DELETE FROM connections;
             DELETE FROM unread_entries;",
        )?;

        insert_blocks(&tx, &snapshot.blocks)?;
        insert_requests(&tx, &snapshot.requests)?;
        insert_connections(&tx, &snapshot.connections)?;
        insert_unread(&tx, &snapshot.unread)?;

        set_meta(&tx, META_NEXT_REQUEST_ID, &snapshot.next_request_id.to_string())?;
        if let Some(taken_at) = snapshot.taken_at {
            set_meta(&tx, META_TAKEN_AT, &taken_at.to_rfc3339())?;
        }

        tx.commit()?;

        tracing::debug!(
            blocks = snapshot.blocks.len(),
            requests = snapshot.requests.len(),
            connections = snapshot.connections.len(),
            unread = snapshot.unread.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load the stored snapshot.  An empty database yields an empty snapshot.
    pub fn load_snapshot(&self) -> Result<EngineSnapshot> {
        let next_request_id: u64 = match self.get_meta(META_NEXT_REQUEST_ID)? {
            Some(raw) => raw
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("{META_NEXT_REQUEST_ID} = '{raw}'")))?,
            None => 1,
        };
        let taken_at = self
            .get_meta(META_TAKEN_AT)?
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| StoreError::Corrupt(format!("{META_TAKEN_AT} = '{raw}'")))
            })
            .transpose()?;

        Ok(EngineSnapshot {
            taken_at,
            next_request_id,
            blocks: self.load_blocks()?,
            requests: self.load_requests()?,
            connections: self.load_connections()?,
            unread: self.load_unread()?,
        })
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM engine_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    // Rows are sorted in Rust: SQLite compares the stored ids as signed.

    fn load_blocks(&self) -> Result<Vec<Block>> {
        let mut stmt = self.conn().prepare(
            "SELECT blocker_id, blocked_id, created_at
             FROM blocks",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Block {
                blocker_id: UserId(get_id(row, 0)?),
                blocked_id: UserId(get_id(row, 1)?),
                created_at: get_timestamp(row, 2)?,
            })
        })?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        blocks.sort_by_key(|b| (b.blocker_id, b.blocked_id));
        Ok(blocks)
    }

    fn load_requests(&self) -> Result<Vec<ConnectionRequest>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, from_user_id, to_user_id, status, created_at, resolved_at
             FROM connection_requests",
        )?;
        let rows = stmt.query_map([], row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        requests.sort_by_key(|r| r.id);
        Ok(requests)
    }

    fn load_connections(&self) -> Result<Vec<Connection>> {
        let mut stmt = self.conn().prepare(
            "SELECT low_id, high_id, established_at
             FROM connections",
        )?;
        let rows = stmt.query_map([], |row| {
            let low = UserId(get_id(row, 0)?);
            let high = UserId(get_id(row, 1)?);
            Ok((low, high, get_timestamp(row, 2)?))
        })?;

        let mut connections = Vec::new();
        for row in rows {
            let (low, high, established_at) = row?;
            let pair = PairKey::new(low, high)
                .ok_or_else(|| StoreError::Corrupt(format!("self-connection for user {low}")))?;
            connections.push(Connection {
                pair,
                established_at,
            });
        }
        connections.sort_by_key(|c| c.pair);
        Ok(connections)
    }

    fn load_unread(&self) -> Result<Vec<UnreadEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT owner_id, source_type, source_id, count, last_event_at
             FROM unread_entries",
        )?;
        let rows = stmt.query_map([], row_to_unread)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        entries.sort_by_key(|e| (e.owner_id, e.source()));
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn set_meta(tx: &Transaction<'_>, key: &str, value: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO engine_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn insert_blocks(tx: &Transaction<'_>, blocks: &[Block]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO blocks (blocker_id, blocked_id, created_at)
         VALUES (?1, ?2, ?3)",
    )?;
    for block in blocks {
        stmt.execute(params![
            sql_id(block.blocker_id.0),
            sql_id(block.blocked_id.0),
            block.created_at.to_rfc3339(),
        ])?;
    }
    Ok(())
}

fn insert_requests(tx: &Transaction<'_>, requests: &[ConnectionRequest]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO connection_requests
            (id, from_user_id, to_user_id, status, created_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for request in requests {
        stmt.execute(params![
            sql_id(request.id.0),
            sql_id(request.from_user_id.0),
            sql_id(request.to_user_id.0),
            request.status.as_str(),
            request.created_at.to_rfc3339(),
            request.resolved_at.map(|at| at.to_rfc3339()),
        ])?;
    }
    Ok(())
}

fn insert_connections(tx: &Transaction<'_>, connections: &[Connection]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO connections (low_id, high_id, established_at)
         VALUES (?1, ?2, ?3)",
    )?;
    for connection in connections {
        stmt.execute(params![
            sql_id(connection.pair.low.0),
            sql_id(connection.pair.high.0),
            connection.established_at.to_rfc3339(),
        ])?;
    }
    Ok(())
}

fn insert_unread(tx: &Transaction<'_>, entries: &[UnreadEntry]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO unread_entries
            (owner_id, source_type, source_id, count, last_event_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in entries {
        stmt.execute(params![
            sql_id(entry.owner_id.0),
            entry.source_type.as_str(),
            sql_id(entry.source_id),
            entry.count,
            entry.last_event_at.to_rfc3339(),
        ])?;
    }
    Ok(())
}

#[derive(Debug)]
struct UnknownValue(String);

impl std::fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for UnknownValue {}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRequest> {
    let status_str: String = row.get(3)?;
    let status = RequestStatus::parse(&status_str)
        .ok_or_else(|| conversion_error(3, UnknownValue(status_str)))?;

    let resolved_at = match row.get::<_, Option<String>>(5)? {
        Some(_) => Some(get_timestamp(row, 5)?),
        None => None,
    };

    Ok(ConnectionRequest {
        id: RequestId(get_id(row, 0)?),
        from_user_id: UserId(get_id(row, 1)?),
        to_user_id: UserId(get_id(row, 2)?),
        status,
        created_at: get_timestamp(row, 4)?,
        resolved_at,
    })
}

fn row_to_unread(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnreadEntry> {
    let type_str: String = row.get(1)?;
    let source_type =
        SourceType::parse(&type_str).ok_or_else(|| conversion_error(1, UnknownValue(type_str)))?;

    Ok(UnreadEntry {
        owner_id: UserId(get_id(row, 0)?),
        source_type,
        source_id: get_id(row, 2)?,
        count: row.get(3)?,
        last_event_at: get_timestamp(row, 4)?,
    })
}
