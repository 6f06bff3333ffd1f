//! SQLite-backed trigger persistence.
//!
//! Definitions survive daemon restarts; on boot the daemon reconstructs
//! watchers for every trigger stored as `active`. The full definition is
//! stored as JSON with a few indexed columns alongside.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::models::{TriggerDefinition, TriggerState};
use crate::errors::{BridgeError, BridgeResult};

pub struct TriggerStore {
    conn: Arc<Mutex<Connection>>,
}

impl TriggerStore {
    pub fn open(path: impl Into<PathBuf>) -> BridgeResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> BridgeResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> BridgeResult<Self> {
        conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS triggers(
                trigger_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                state TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                definition TEXT NOT NULL,
                updated_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_triggers_state ON triggers(state);
             COMMIT;",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> BridgeResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BridgeError::Internal("trigger store lock poisoned".to_string()))
    }

    /// Insert or replace a definition.
    pub fn upsert(&self, trigger: &TriggerDefinition) -> BridgeResult<()> {
        let definition = serde_json::to_string(trigger)?;
        let state = serde_json::to_value(trigger.state)?
            .as_str()
            .unwrap_or("inactive")
            .to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO triggers(trigger_id, name, state, priority, definition, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                trigger.trigger_id,
                trigger.name,
                state,
                trigger.priority,
                definition,
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, trigger_id: &str) -> BridgeResult<Option<TriggerDefinition>> {
        let conn = self.lock()?;
        let row: Option<String> = conn
            .query_row(
                "SELECT definition FROM triggers WHERE trigger_id = ?1",
                params![trigger_id],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(definition) => Ok(Some(serde_json::from_str(&definition)?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> BridgeResult<Vec<TriggerDefinition>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT definition FROM triggers ORDER BY trigger_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut triggers = Vec::new();
        for row in rows {
            triggers.push(serde_json::from_str(&row?)?);
        }
        Ok(triggers)
    }

    pub fn list_by_state(&self, state: TriggerState) -> BridgeResult<Vec<TriggerDefinition>> {
        let wanted = serde_json::to_value(state)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT definition FROM triggers WHERE state = ?1 ORDER BY trigger_id")?;
        let rows = stmt.query_map(params![wanted], |row| row.get::<_, String>(0))?;
        let mut triggers = Vec::new();
        for row in rows {
            triggers.push(serde_json::from_str(&row?)?);
        }
        Ok(triggers)
    }

    pub fn delete(&self, trigger_id: &str) -> BridgeResult<bool> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "DELETE FROM triggers WHERE trigger_id = ?1",
            params![trigger_id],
        )?;
        Ok(affected > 0)
    }
}
