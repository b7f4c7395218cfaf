//! # campuslink-store
//!
//! SQLite persistence for the relationship engine. Holds the profile and
//! group directories the engine reads from, and periodic snapshots of the
//! engine's own state so a restart does not lose blocks, connections or
//! unread counters.

pub mod database;
pub mod directory;
pub mod groups;
pub mod migrations;
pub mod profiles;
pub mod snapshot;

mod error;

pub use database::Database;
pub use directory::SqliteDirectory;
pub use error::StoreError;
