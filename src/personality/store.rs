//! SQLite-backed store for personalities and evolution logs.
//!
//! The store is the single writer for the "active personality" flag:
//! `activate` runs as one immediate transaction that deactivates every other
//! row, verifies exactly one row is active, and only then commits, so no two
//! activations can race into a double-active state. Evolution logs are
//! append-only; rollback and reset write new entries and never touch old
//! ones.
//!
//! Synchronous methods open a connection per call; `a`-prefixed variants wrap
//! them in `tokio::task::spawn_blocking` for use from async contexts.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use crate::error::OrchestratorError;

use super::{EvolutionLog, PersonaSnapshot, Personality, PersonalityUpdate};

const PERSONALITY_COLS: &str = "id, name, base_prompt, is_active, created_at";
const LOG_COLS: &str = "id, personality_id, traits, reason, created_at";

/// Store handle; cheap to clone (clones share the database file).
#[derive(Debug, Clone)]
pub struct PersonalityStore {
    db_path: PathBuf,
}

impl PersonalityStore {
    /// Open (or create) the store at `db_path` and ensure its tables exist.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self, OrchestratorError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OrchestratorError::storage(e.to_string()))?;
            }
        }

        let store = Self { db_path };
        let conn = store.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS personalities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_prompt TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS evolution_logs (
                id TEXT PRIMARY KEY,
                personality_id TEXT NOT NULL,
                traits TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_evolution_logs_personality
                ON evolution_logs(personality_id, created_at DESC);",
        )?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, OrchestratorError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Personality CRUD
    // -----------------------------------------------------------------------

    /// Create a personality. The first personality ever created is activated
    /// so the engine always has one answering profile; later ones start
    /// inactive until an explicit `activate`.
    pub fn create(&self, name: &str, base_prompt: &str) -> Result<Personality, OrchestratorError> {
        if name.trim().is_empty() {
            return Err(OrchestratorError::validation("personality name is empty"));
        }
        if base_prompt.trim().is_empty() {
            return Err(OrchestratorError::validation("base prompt is empty"));
        }

        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let count: i64 = tx.query_row("SELECT COUNT(*) FROM personalities", [], |r| r.get(0))?;
        let personality = Personality {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            base_prompt: base_prompt.to_string(),
            is_active: count == 0,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO personalities (id, name, base_prompt, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                personality.id,
                personality.name,
                personality.base_prompt,
                personality.is_active as i64,
                personality.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        log::debug!(
            "created personality {} ({}active)",
            personality.id,
            if personality.is_active { "" } else { "in" }
        );
        Ok(personality)
    }

    /// All personalities, oldest first.
    pub fn list(&self) -> Result<Vec<Personality>, OrchestratorError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PERSONALITY_COLS} FROM personalities ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map([], personality_from_row)?;
        let mut personalities = Vec::new();
        for row in rows {
            personalities.push(row?);
        }
        Ok(personalities)
    }

    /// Fetch one personality by id.
    pub fn get(&self, id: &str) -> Result<Personality, OrchestratorError> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {PERSONALITY_COLS} FROM personalities WHERE id = ?1"),
            params![id],
            personality_from_row,
        )
        .optional()?
        .ok_or_else(|| OrchestratorError::not_found("personality", id))
    }

    /// Apply a partial update to name and/or base prompt.
    pub fn update(
        &self,
        id: &str,
        update: &PersonalityUpdate,
    ) -> Result<Personality, OrchestratorError> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(OrchestratorError::validation("personality name is empty"));
            }
        }
        if let Some(base_prompt) = &update.base_prompt {
            if base_prompt.trim().is_empty() {
                return Err(OrchestratorError::validation("base prompt is empty"));
            }
        }

        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut current = tx
            .query_row(
                &format!("SELECT {PERSONALITY_COLS} FROM personalities WHERE id = ?1"),
                params![id],
                personality_from_row,
            )
            .optional()?
            .ok_or_else(|| OrchestratorError::not_found("personality", id))?;
        if let Some(name) = &update.name {
            current.name = name.trim().to_string();
        }
        if let Some(base_prompt) = &update.base_prompt {
            current.base_prompt = base_prompt.clone();
        }
        tx.execute(
            "UPDATE personalities SET name = ?1, base_prompt = ?2 WHERE id = ?3",
            params![current.name, current.base_prompt, id],
        )?;
        tx.commit()?;
        Ok(current)
    }

    /// Atomically make `id` the only active personality.
    ///
    /// Runs in one immediate transaction: deactivate all, activate the
    /// target, verify the invariant, commit. A verification failure rolls
    /// back and is reported as a consistency violation.
    pub fn activate(&self, id: &str) -> Result<Personality, OrchestratorError> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM personalities WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(OrchestratorError::not_found("personality", id));
        }
        tx.execute("UPDATE personalities SET is_active = 0 WHERE is_active = 1", [])?;
        tx.execute(
            "UPDATE personalities SET is_active = 1 WHERE id = ?1",
            params![id],
        )?;
        let active: i64 = tx.query_row(
            "SELECT COUNT(*) FROM personalities WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?;
        if active != 1 {
            log::error!("activation of {id} would leave {active} active personalities");
            return Err(OrchestratorError::consistency(format!(
                "activation would leave {active} active personalities"
            )));
        }
        let personality = tx.query_row(
            &format!("SELECT {PERSONALITY_COLS} FROM personalities WHERE id = ?1"),
            params![id],
            personality_from_row,
        )?;
        tx.commit()?;
        Ok(personality)
    }

    /// Delete an inactive personality and its evolution history.
    pub fn delete(&self, id: &str) -> Result<(), OrchestratorError> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let is_active: Option<i64> = tx
            .query_row(
                "SELECT is_active FROM personalities WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        match is_active {
            None => return Err(OrchestratorError::not_found("personality", id)),
            Some(active) if active != 0 => {
                return Err(OrchestratorError::consistency(
                    "cannot delete the active personality",
                ));
            }
            Some(_) => {}
        }
        tx.execute(
            "DELETE FROM evolution_logs WHERE personality_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM personalities WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// The currently active personality, if any exists yet.
    pub fn active(&self) -> Result<Option<Personality>, OrchestratorError> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                &format!("SELECT {PERSONALITY_COLS} FROM personalities WHERE is_active = 1"),
                [],
                personality_from_row,
            )
            .optional()?)
    }

    /// One consistent view of the active personality plus its newest
    /// evolution log, read in a single transaction. Taken at task start so a
    /// concurrent activate/evolve never partially affects an in-flight task.
    pub fn snapshot(&self) -> Result<PersonaSnapshot, OrchestratorError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let personality = tx
            .query_row(
                &format!("SELECT {PERSONALITY_COLS} FROM personalities WHERE is_active = 1"),
                [],
                personality_from_row,
            )
            .optional()?
            .ok_or_else(|| OrchestratorError::not_found("active personality", "none"))?;
        let latest = tx
            .query_row(
                &format!(
                    "SELECT {LOG_COLS} FROM evolution_logs WHERE personality_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![personality.id],
                log_from_row,
            )
            .optional()?;
        Ok(PersonaSnapshot {
            personality_id: personality.id,
            name: personality.name,
            base_prompt: personality.base_prompt,
            traits: latest.as_ref().map(|l| l.traits.clone()),
            log_id: latest.map(|l| l.id),
        })
    }

    // -----------------------------------------------------------------------
    // Evolution history
    // -----------------------------------------------------------------------

    /// Append a new evolution log entry for `personality_id`.
    pub fn append_log(
        &self,
        personality_id: &str,
        traits: &str,
        reason: &str,
    ) -> Result<EvolutionLog, OrchestratorError> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM personalities WHERE id = ?1",
                params![personality_id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(OrchestratorError::not_found("personality", personality_id));
        }
        let log = EvolutionLog {
            id: Uuid::new_v4().to_string(),
            personality_id: personality_id.to_string(),
            traits: traits.to_string(),
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO evolution_logs (id, personality_id, traits, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.id,
                log.personality_id,
                log.traits,
                log.reason,
                log.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(log)
    }

    /// Evolution history for a personality, newest first.
    pub fn history(&self, personality_id: &str) -> Result<Vec<EvolutionLog>, OrchestratorError> {
        // NotFound for an unknown personality keeps the admin surface honest.
        self.get(personality_id)?;
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLS} FROM evolution_logs WHERE personality_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![personality_id], log_from_row)?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }

    /// The newest evolution log for a personality, if any.
    pub fn latest_log(
        &self,
        personality_id: &str,
    ) -> Result<Option<EvolutionLog>, OrchestratorError> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {LOG_COLS} FROM evolution_logs WHERE personality_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![personality_id],
                log_from_row,
            )
            .optional()?)
    }

    /// Fetch one evolution log by id.
    pub fn get_log(&self, log_id: &str) -> Result<EvolutionLog, OrchestratorError> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {LOG_COLS} FROM evolution_logs WHERE id = ?1"),
            params![log_id],
            log_from_row,
        )
        .optional()?
        .ok_or_else(|| OrchestratorError::not_found("evolution log", log_id))
    }

    /// Roll back by appending a new log that clones the target entry's
    /// traits. The target entry itself is never altered.
    pub fn rollback(
        &self,
        personality_id: &str,
        target_log_id: &str,
    ) -> Result<EvolutionLog, OrchestratorError> {
        let target = self.get_log(target_log_id)?;
        if target.personality_id != personality_id {
            return Err(OrchestratorError::validation(format!(
                "evolution log {target_log_id} does not belong to personality {personality_id}"
            )));
        }
        self.append_log(
            personality_id,
            &target.traits,
            &format!("Rollback to entry from {}", target.created_at.to_rfc3339()),
        )
    }

    /// Drop back to the base prompt by appending an empty-traits entry.
    pub fn reset(&self, personality_id: &str) -> Result<EvolutionLog, OrchestratorError> {
        self.append_log(personality_id, "", "Manual reset")
    }

    // -----------------------------------------------------------------------
    // Async wrappers (spawn_blocking)
    // -----------------------------------------------------------------------

    pub async fn acreate(
        &self,
        name: &str,
        base_prompt: &str,
    ) -> Result<Personality, OrchestratorError> {
        let this = self.clone();
        let name = name.to_string();
        let base_prompt = base_prompt.to_string();
        tokio::task::spawn_blocking(move || this.create(&name, &base_prompt)).await?
    }

    pub async fn alist(&self) -> Result<Vec<Personality>, OrchestratorError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.list()).await?
    }

    pub async fn aget(&self, id: &str) -> Result<Personality, OrchestratorError> {
        let this = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || this.get(&id)).await?
    }

    pub async fn aupdate(
        &self,
        id: &str,
        update: PersonalityUpdate,
    ) -> Result<Personality, OrchestratorError> {
        let this = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || this.update(&id, &update)).await?
    }

    pub async fn aactivate(&self, id: &str) -> Result<Personality, OrchestratorError> {
        let this = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || this.activate(&id)).await?
    }

    pub async fn adelete(&self, id: &str) -> Result<(), OrchestratorError> {
        let this = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || this.delete(&id)).await?
    }

    pub async fn asnapshot(&self) -> Result<PersonaSnapshot, OrchestratorError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.snapshot()).await?
    }

    pub async fn aappend_log(
        &self,
        personality_id: &str,
        traits: &str,
        reason: &str,
    ) -> Result<EvolutionLog, OrchestratorError> {
        let this = self.clone();
        let personality_id = personality_id.to_string();
        let traits = traits.to_string();
        let reason = reason.to_string();
        tokio::task::spawn_blocking(move || this.append_log(&personality_id, &traits, &reason))
            .await?
    }

    pub async fn ahistory(
        &self,
        personality_id: &str,
    ) -> Result<Vec<EvolutionLog>, OrchestratorError> {
        let this = self.clone();
        let personality_id = personality_id.to_string();
        tokio::task::spawn_blocking(move || this.history(&personality_id)).await?
    }

    pub async fn arollback(
        &self,
        personality_id: &str,
        target_log_id: &str,
    ) -> Result<EvolutionLog, OrchestratorError> {
        let this = self.clone();
        let personality_id = personality_id.to_string();
        let target_log_id = target_log_id.to_string();
        tokio::task::spawn_blocking(move || this.rollback(&personality_id, &target_log_id)).await?
    }

    pub async fn areset(&self, personality_id: &str) -> Result<EvolutionLog, OrchestratorError> {
        let this = self.clone();
        let personality_id = personality_id.to_string();
        tokio::task::spawn_blocking(move || this.reset(&personality_id)).await?
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn personality_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Personality> {
    Ok(Personality {
        id: row.get(0)?,
        name: row.get(1)?,
        base_prompt: row.get(2)?,
        is_active: row.get::<_, i64>(3)? != 0,
        created_at: parse_ts(4, row.get(4)?)?,
    })
}

fn log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvolutionLog> {
    Ok(EvolutionLog {
        id: row.get(0)?,
        personality_id: row.get(1)?,
        traits: row.get(2)?,
        reason: row.get(3)?,
        created_at: parse_ts(4, row.get(4)?)?,
    })
}

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
