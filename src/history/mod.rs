//! Per-conversation transcript recording.
//!
//! Every handled task appends the inbound user message and the published
//! reply here. Two readers consume the table: the context assembler takes a
//! small recent window for one conversation (short-term continuity), and the
//! evolution manager takes a larger window across all conversations as its
//! history source. Recording failures are logged by callers and never fail a
//! task.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::OrchestratorError;

/// Role string for user-authored entries.
pub const ROLE_USER: &str = "user";
/// Role string for engine-published replies.
pub const ROLE_ASSISTANT: &str = "assistant";

/// One recorded message of a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub id: i64,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed transcript log; cheap to clone (clones share the file).
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    db_path: PathBuf,
}

impl TranscriptStore {
    /// Open (or create) the store at `db_path` and ensure its table exists.
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
            "CREATE TABLE IF NOT EXISTS transcripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transcripts_conversation
                ON transcripts(conversation_id, id);",
        )?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, OrchestratorError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Append one entry.
    pub fn record(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<TranscriptEntry, OrchestratorError> {
        let created_at = Utc::now();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO transcripts (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role, content, created_at.to_rfc3339()],
        )?;
        Ok(TranscriptEntry {
            id: conn.last_insert_rowid(),
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at,
        })
    }

    /// The last `limit` entries of one conversation, oldest first.
    pub fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<TranscriptEntry>, OrchestratorError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, conversation_id, role, content, created_at
             FROM transcripts WHERE conversation_id = ?1
             ORDER BY id DESC LIMIT {limit}"
        ))?;
        let rows = stmt.query_map(params![conversation_id], entry_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        entries.reverse();
        Ok(entries)
    }

    /// The last `limit` entries across all conversations, oldest first.
    /// This is the evolution manager's history window.
    pub fn recent_all(&self, limit: usize) -> Result<Vec<TranscriptEntry>, OrchestratorError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, conversation_id, role, content, created_at
             FROM transcripts ORDER BY id DESC LIMIT {limit}"
        ))?;
        let rows = stmt.query_map([], entry_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        entries.reverse();
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Async wrappers (spawn_blocking)
    // -----------------------------------------------------------------------

    pub async fn arecord(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<TranscriptEntry, OrchestratorError> {
        let this = self.clone();
        let conversation_id = conversation_id.to_string();
        let role = role.to_string();
        let content = content.to_string();
        tokio::task::spawn_blocking(move || this.record(&conversation_id, &role, &content)).await?
    }

    pub async fn arecent(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<TranscriptEntry>, OrchestratorError> {
        let this = self.clone();
        let conversation_id = conversation_id.to_string();
        tokio::task::spawn_blocking(move || this.recent(&conversation_id, limit)).await?
    }

    pub async fn arecent_all(&self, limit: usize) -> Result<Vec<TranscriptEntry>, OrchestratorError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.recent_all(limit)).await?
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscriptEntry> {
    let raw: String = row.get(4)?;
    let created_at = DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(TranscriptEntry {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at,
    })
}
