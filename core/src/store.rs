//! SQLite persistence for a session's action log.
//!
//! RULE: Only store.rs talks to the database.
//! The log is written once per accepted action and read back for replay.

use crate::{
    action_log::ActionLogEntry,
    config::GameSetup,
    error::SyncResult,
    types::Sequence,
};
use rusqlite::{params, Connection, OptionalExtension};

pub struct ActionLogStore {
    conn: Connection,
}

impl ActionLogStore {
    /// Open (or create) the log database at `path`.
    pub fn open(path: &str) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: readers do not block the writer.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SyncResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_action_log.sql"))?;
        Ok(())
    }

    // ── Session ────────────────────────────────────────────────

    /// Record a session. `setup.seed` must be the seed actually used.
    pub fn insert_session(&self, session_id: &str, setup: &GameSetup, version: &str) -> SyncResult<()> {
        let seed = setup
            .seed
            .ok_or_else(|| anyhow::anyhow!("session {session_id} stored without a seed"))?;
        self.conn.execute(
            "INSERT INTO session (session_id, seed, setup_json, version, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                seed as i64,
                serde_json::to_string(setup)?,
                version,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn session_setup(&self, session_id: &str) -> SyncResult<Option<GameSetup>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT setup_json FROM session WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn session_ids(&self) -> SyncResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT session_id FROM session ORDER BY started_at ASC, session_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ── Action log ─────────────────────────────────────────────

    pub fn append_entry(&self, session_id: &str, entry: &ActionLogEntry) -> SyncResult<()> {
        self.conn.execute(
            "INSERT INTO action_log (
                session_id, sequence, actor, action_type,
                action_json, diffs_json, draws_json, checksum
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                entry.sequence as i64,
                entry.action.actor,
                entry.action.kind.name(),
                serde_json::to_string(&entry.action)?,
                serde_json::to_string(&entry.diffs)?,
                serde_json::to_string(&entry.rng_draws)?,
                entry.resulting_checksum as i64,
            ],
        )?;
        Ok(())
    }

    /// Append every entry past what is already stored for the session.
    /// Returns how many rows were written.
    pub fn sync_entries(&self, session_id: &str, entries: &[ActionLogEntry]) -> SyncResult<usize> {
        let stored = self.last_sequence(session_id)?;
        let mut written = 0;
        for entry in entries.iter().filter(|e| e.sequence > stored) {
            self.append_entry(session_id, entry)?;
            written += 1;
        }
        Ok(written)
    }

    pub fn last_sequence(&self, session_id: &str) -> SyncResult<Sequence> {
        let last: Option<i64> = self.conn.query_row(
            "SELECT MAX(sequence) FROM action_log WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(last.unwrap_or(0) as Sequence)
    }

    pub fn entries_for_session(&self, session_id: &str) -> SyncResult<Vec<ActionLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT sequence, action_json, diffs_json, draws_json, checksum
             FROM action_log WHERE session_id = ?1
             ORDER BY sequence ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(sequence, action, diffs, draws, checksum)| -> SyncResult<ActionLogEntry> {
                Ok(ActionLogEntry {
                    sequence:           sequence as Sequence,
                    action:             serde_json::from_str(&action)?,
                    diffs:              serde_json::from_str(&diffs)?,
                    rng_draws:          serde_json::from_str(&draws)?,
                    resulting_checksum: checksum as u64,
                })
            })
            .collect()
    }
}
