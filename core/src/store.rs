//! Storage adapters for the persistence bus.
//!
//! RULE: Only this module talks to the database.
//! The buses see nothing but the `StorageAdapter` contract.

use crate::{
    delivery::lock,
    error::SimResult,
    persistence::StorageAdapter,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Mutex;

pub const DEFAULT_SLOT: &str = "main";

/// SQLite-backed storage. State is stored as JSON, one row per save slot.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    slot: String,
}

impl SqliteStorage {
    /// Open (or create) the save database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self::with_connection(conn))
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            slot: DEFAULT_SLOT.to_string(),
        }
    }

    /// Use a different save slot in the same database.
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        lock(&self.conn).execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    /// Number of writes recorded for this slot.
    pub fn save_count(&self) -> SimResult<i64> {
        let count = lock(&self.conn).query_row(
            "SELECT COUNT(*) FROM save_log WHERE slot = ?1",
            params![self.slot],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl<S> StorageAdapter<S> for SqliteStorage
where
    S: Serialize + DeserializeOwned + Send + Sync,
{
    fn save(&self, state: &S, saved_at: DateTime<Utc>) -> SimResult<()> {
        let json = serde_json::to_string(state)?;
        let saved_at = saved_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO save_slot (slot, state_json, last_played) VALUES (?1, ?2, ?3)
             ON CONFLICT(slot) DO UPDATE SET
                 state_json  = excluded.state_json,
                 last_played = excluded.last_played",
            params![self.slot, json, saved_at],
        )?;
        tx.execute(
            "INSERT INTO save_log (slot, saved_at, bytes) VALUES (?1, ?2, ?3)",
            params![self.slot, saved_at, json.len() as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load(&self) -> SimResult<Option<S>> {
        let json: Option<String> = lock(&self.conn)
            .query_row(
                "SELECT state_json FROM save_slot WHERE slot = ?1",
                params![self.slot],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn last_played(&self) -> SimResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = lock(&self.conn)
            .query_row(
                "SELECT last_played FROM save_slot WHERE slot = ?1",
                params![self.slot],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))),
            None => Ok(None),
        }
    }

    fn clear(&self) -> SimResult<()> {
        lock(&self.conn).execute("DELETE FROM save_slot WHERE slot = ?1", params![self.slot])?;
        Ok(())
    }
}

/// In-process storage. Keeps the last saved state and counts writes.
pub struct MemoryStorage<S> {
    slot: Mutex<MemorySlot<S>>,
}

struct MemorySlot<S> {
    state:       Option<S>,
    last_played: Option<DateTime<Utc>>,
    saves:       usize,
}

impl<S: Clone> MemoryStorage<S> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(MemorySlot { state: None, last_played: None, saves: 0 }),
        }
    }

    /// Storage that already holds a save, as if from an earlier session.
    pub fn with_save(state: S, last_played: DateTime<Utc>) -> Self {
        Self {
            slot: Mutex::new(MemorySlot {
                state:       Some(state),
                last_played: Some(last_played),
                saves:       0,
            }),
        }
    }

    pub fn save_count(&self) -> usize {
        lock(&self.slot).saves
    }

    pub fn saved_state(&self) -> Option<S> {
        lock(&self.slot).state.clone()
    }
}

impl<S: Clone> Default for MemoryStorage<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone + Send + Sync> StorageAdapter<S> for MemoryStorage<S> {
    fn save(&self, state: &S, saved_at: DateTime<Utc>) -> SimResult<()> {
        let mut slot = lock(&self.slot);
        slot.state = Some(state.clone());
        slot.last_played = Some(saved_at);
        slot.saves += 1;
        Ok(())
    }

    fn load(&self) -> SimResult<Option<S>> {
        Ok(lock(&self.slot).state.clone())
    }

    fn last_played(&self) -> SimResult<Option<DateTime<Utc>>> {
        Ok(lock(&self.slot).last_played)
    }

    fn clear(&self) -> SimResult<()> {
        let mut slot = lock(&self.slot);
        slot.state = None;
        slot.last_played = None;
        Ok(())
    }
}
