//! Snapshot slots – where the timeline keeps its persisted copy.
//!
//! A slot holds exactly one opaque string (the JSON-serialized timeline).
//! There is no schema versioning: a record-shape change either migrates or
//! discards the slot.
//!
//! # Storage layout
//!
//! [`SqliteSlot`] creates (if it does not already exist) a single table:
//!
//! | column     | type | description                         |
//! |------------|------|-------------------------------------|
//! | name       | TEXT | Slot name, primary key              |
//! | payload    | TEXT | Serialized snapshot                 |
//! | updated_at | TEXT | RFC-3339 time of the last write     |

use chrono::Utc;
use deskwatch_types::WatchError;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Name of the slot that holds the timeline snapshot.
pub const TIMELINE_SLOT: &str = "timeline";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise while reading or writing a snapshot.
#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Snapshot slot unavailable: {0}")]
    Unavailable(String),
}

impl From<TimelineError> for WatchError {
    fn from(e: TimelineError) -> Self {
        WatchError::Storage(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SnapshotSlot
// ─────────────────────────────────────────────────────────────────────────────

/// A single named persistence slot.
pub trait SnapshotSlot: Send {
    /// Return the stored payload, or `None` if nothing was ever written or
    /// the slot was erased.
    fn read(&self) -> Result<Option<String>, TimelineError>;

    /// Replace the stored payload.
    fn write(&mut self, payload: &str) -> Result<(), TimelineError>;

    /// Remove the stored payload.
    fn erase(&mut self) -> Result<(), TimelineError>;
}

impl<S: SnapshotSlot + ?Sized> SnapshotSlot for Box<S> {
    fn read(&self) -> Result<Option<String>, TimelineError> {
        (**self).read()
    }

    fn write(&mut self, payload: &str) -> Result<(), TimelineError> {
        (**self).write(payload)
    }

    fn erase(&mut self) -> Result<(), TimelineError> {
        (**self).erase()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteSlot
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed slot. One row per slot name.
pub struct SqliteSlot {
    conn: Connection,
    name: String,
}

impl SqliteSlot {
    /// Open (or create) a persistent SQLite database at `path` and bind the
    /// [`TIMELINE_SLOT`] row.
    pub fn open(path: &str) -> Result<Self, TimelineError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, TIMELINE_SLOT)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, TimelineError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, TIMELINE_SLOT)
    }

    fn with_connection(conn: Connection, name: &str) -> Result<Self, TimelineError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshot_slots (
                name       TEXT NOT NULL PRIMARY KEY,
                payload    TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn,
            name: name.to_string(),
        })
    }
}

impl SnapshotSlot for SqliteSlot {
    fn read(&self) -> Result<Option<String>, TimelineError> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM snapshot_slots WHERE name = ?1",
                params![self.name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn write(&mut self, payload: &str) -> Result<(), TimelineError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO snapshot_slots (name, payload, updated_at)
             VALUES (?1, ?2, ?3)",
            params![self.name, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn erase(&mut self) -> Result<(), TimelineError> {
        self.conn.execute(
            "DELETE FROM snapshot_slots WHERE name = ?1",
            params![self.name],
        )?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemorySlot
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local slot. Nothing survives a restart.
#[derive(Debug, Default, Clone)]
pub struct MemorySlot {
    payload: Option<String>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the slot, e.g. with a snapshot written by another instance.
    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }
}

impl SnapshotSlot for MemorySlot {
    fn read(&self) -> Result<Option<String>, TimelineError> {
        Ok(self.payload.clone())
    }

    fn write(&mut self, payload: &str) -> Result<(), TimelineError> {
        self.payload = Some(payload.to_string());
        Ok(())
    }

    fn erase(&mut self) -> Result<(), TimelineError> {
        self.payload = None;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_slot_starts_empty() {
        let slot = SqliteSlot::open_in_memory().unwrap();
        assert!(slot.read().unwrap().is_none());
    }

    #[test]
    fn sqlite_slot_write_replaces_payload() {
        let mut slot = SqliteSlot::open_in_memory().unwrap();
        slot.write("[1]").unwrap();
        slot.write("[1,2]").unwrap();
        assert_eq!(slot.read().unwrap().as_deref(), Some("[1,2]"));
    }

    #[test]
    fn sqlite_slot_erase_removes_row() {
        let mut slot = SqliteSlot::open_in_memory().unwrap();
        slot.write("[]").unwrap();
        slot.erase().unwrap();
        assert!(slot.read().unwrap().is_none());
    }

    #[test]
    fn sqlite_slot_survives_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("timeline.sqlite3");
        let path = path.to_string_lossy();
        {
            let mut slot = SqliteSlot::open(&path).unwrap();
            slot.write("[\"persisted\"]").unwrap();
        }
        let reopened = SqliteSlot::open(&path).unwrap();
        assert_eq!(reopened.read().unwrap().as_deref(), Some("[\"persisted\"]"));
    }

    #[test]
    fn slot_errors_surface_as_storage_errors() {
        let err: WatchError = TimelineError::Unavailable("disk full".to_string()).into();
        assert!(matches!(err, WatchError::Storage(msg) if msg.contains("disk full")));
    }

    #[test]
    fn memory_slot_roundtrip() {
        let mut slot = MemorySlot::new();
        assert!(slot.read().unwrap().is_none());
        slot.write("abc").unwrap();
        assert_eq!(slot.read().unwrap().as_deref(), Some("abc"));
        slot.erase().unwrap();
        assert!(slot.read().unwrap().is_none());
    }
}
