//! Database module
//!
//! Provides persistence for rulesets and in-flight call conversations.

mod schema;

pub use schema::SCHEMA;

use crate::models::{Conversation, Recording, Ruleset};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Ruleset not found: {0}")]
    RulesetNotFound(String),
    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // ==================== Ruleset Operations ====================

    /// Insert or replace a ruleset
    pub fn add_ruleset(&self, ruleset: &Ruleset) -> DbResult<()> {
        let body = serde_json::to_string(ruleset)?;
        self.conn()?.execute(
            "INSERT INTO rulesets (id, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![ruleset.id, body, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_ruleset(&self, id: &str) -> DbResult<Ruleset> {
        let body: Option<String> = self
            .conn()?
            .query_row("SELECT body FROM rulesets WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;

        let body = body.ok_or_else(|| DbError::RulesetNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }

    // ==================== Conversation Operations ====================

    /// Create the conversation for a call; a repeated create leaves the existing record
    pub fn create_conversation(&self, id: &str, ruleset_id: &str) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT OR IGNORE INTO conversations (id, ruleset_id, done, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?3)",
            params![id, ruleset_id, now],
        )?;
        Ok(())
    }

    /// Get conversation with its responses and recordings
    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.conn()?;

        let header: Option<(String, bool)> = conn
            .query_row(
                "SELECT ruleset_id, done FROM conversations WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (ruleset_id, done) =
            header.ok_or_else(|| DbError::ConversationNotFound(id.to_string()))?;

        let mut stmt =
            conn.prepare("SELECT purpose, answer FROM responses WHERE conversation_id = ?1")?;
        let responses = stmt
            .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, String>, _>>()?;

        Ok(Conversation {
            id: id.to_string(),
            ruleset_id,
            responses,
            recordings: Self::recordings_for(&conn, id)?,
            done,
        })
    }

    pub fn mark_done(&self, id: &str) -> DbResult<()> {
        let updated = self.conn()?.execute(
            "UPDATE conversations SET done = 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a conversation together with its responses and recordings
    pub fn delete_conversation(&self, id: &str) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM responses WHERE conversation_id = ?1", params![id])?;
        tx.execute("DELETE FROM recordings WHERE conversation_id = ?1", params![id])?;
        tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Response Operations ====================

    /// Store the answer for one purpose; other purposes are untouched
    pub fn add_response(&self, conversation_id: &str, purpose: &str, answer: &str) -> DbResult<()> {
        let conn = self.conn()?;
        Self::ensure_conversation(&conn, conversation_id)?;
        conn.execute(
            "INSERT INTO responses (conversation_id, purpose, answer, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(conversation_id, purpose)
             DO UPDATE SET answer = excluded.answer, updated_at = excluded.updated_at",
            params![conversation_id, purpose, answer, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ==================== Recording Operations ====================

    /// Append a recording; a URL already stored for the conversation is ignored
    pub fn add_recording(&self, conversation_id: &str, recording: &Recording) -> DbResult<()> {
        let conn = self.conn()?;
        Self::ensure_conversation(&conn, conversation_id)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO recordings (conversation_id, url, purpose, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation_id,
                recording.url,
                recording.purpose,
                Utc::now().to_rfc3339()
            ],
        )?;

        if inserted == 0 {
            tracing::debug!(
                conversation_id = %conversation_id,
                url = %recording.url,
                "Recording already stored"
            );
        }
        Ok(())
    }

    /// Recordings in arrival order
    pub fn list_recordings(&self, conversation_id: &str) -> DbResult<Vec<Recording>> {
        let conn = self.conn()?;
        Self::recordings_for(&conn, conversation_id)
    }

    /// Late writers must not recreate rows for a deleted conversation
    fn ensure_conversation(conn: &Connection, id: &str) -> DbResult<()> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(DbError::ConversationNotFound(id.to_string()))
        }
    }

    fn recordings_for(conn: &Connection, conversation_id: &str) -> DbResult<Vec<Recording>> {
        let mut stmt = conn.prepare(
            "SELECT url, purpose FROM recordings WHERE conversation_id = ?1 ORDER BY sequence_id",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(Recording {
                url: row.get(0)?,
                purpose: row.get(1)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Step;

    fn intake() -> Ruleset {
        Ruleset {
            id: "intake".to_string(),
            title: "Intake".to_string(),
            simple: true,
            client: None,
            steps: vec![Step::new("Wat is uw naam?", "name")],
        }
    }

    #[test]
    fn test_ruleset_roundtrip_and_replace() {
        let db = Database::open_in_memory().unwrap();
        let mut ruleset = intake();
        db.add_ruleset(&ruleset).unwrap();
        assert_eq!(db.get_ruleset("intake").unwrap(), ruleset);

        ruleset.title = "Intake v2".to_string();
        db.add_ruleset(&ruleset).unwrap();
        assert_eq!(db.get_ruleset("intake").unwrap().title, "Intake v2");

        assert!(matches!(
            db.get_ruleset("missing"),
            Err(DbError::RulesetNotFound(_))
        ));
    }

    #[test]
    fn test_create_and_get_conversation() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("call-1", "intake").unwrap();

        let conv = db.get_conversation("call-1").unwrap();
        assert_eq!(conv, Conversation::new("call-1", "intake"));

        // Redelivered answer events must not reset progress
        db.add_response("call-1", "name", "Jan").unwrap();
        db.create_conversation("call-1", "other").unwrap();
        let conv = db.get_conversation("call-1").unwrap();
        assert_eq!(conv.ruleset_id, "intake");
        assert_eq!(conv.responses.len(), 1);
    }

    #[test]
    fn test_responses_merge_per_purpose() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("call-1", "intake").unwrap();

        db.add_response("call-1", "name", "jan").unwrap();
        db.add_response("call-1", "address", "Kerkstraat 1").unwrap();
        db.add_response("call-1", "name", "Jan").unwrap();

        let conv = db.get_conversation("call-1").unwrap();
        assert_eq!(conv.responses.len(), 2);
        assert_eq!(conv.responses["name"], "Jan");
        assert_eq!(conv.responses["address"], "Kerkstraat 1");
    }

    #[test]
    fn test_recordings_append_in_order() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("call-1", "intake").unwrap();

        for (url, purpose) in [("u1", "name"), ("u2", "address"), ("u3", "name")] {
            db.add_recording(
                "call-1",
                &Recording {
                    url: url.to_string(),
                    purpose: purpose.to_string(),
                },
            )
            .unwrap();
        }

        let urls: Vec<String> = db
            .list_recordings("call-1")
            .unwrap()
            .into_iter()
            .map(|r| r.url)
            .collect();
        assert_eq!(urls, vec!["u1", "u2", "u3"]);
        assert!(db.list_recordings("call-2").unwrap().is_empty());
    }

    #[test]
    fn test_redelivered_recording_is_stored_once() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("call-1", "intake").unwrap();

        let recording = Recording {
            url: "u1".to_string(),
            purpose: "name".to_string(),
        };
        db.add_recording("call-1", &recording).unwrap();
        db.add_recording("call-1", &recording).unwrap();

        assert_eq!(db.list_recordings("call-1").unwrap(), vec![recording]);
    }

    #[test]
    fn test_writes_after_delete_leave_no_rows() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("call-1", "intake").unwrap();
        db.delete_conversation("call-1").unwrap();

        assert!(matches!(
            db.add_response("call-1", "name", "Jan"),
            Err(DbError::ConversationNotFound(_))
        ));
        assert!(matches!(
            db.add_recording(
                "call-1",
                &Recording {
                    url: "u1".to_string(),
                    purpose: "name".to_string(),
                },
            ),
            Err(DbError::ConversationNotFound(_))
        ));
        assert!(db.list_recordings("call-1").unwrap().is_empty());

        let orphans: i64 = db
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM responses WHERE conversation_id = 'call-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_mark_done_and_delete() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("call-1", "intake").unwrap();
        db.add_response("call-1", "name", "Jan").unwrap();

        db.mark_done("call-1").unwrap();
        assert!(db.get_conversation("call-1").unwrap().done);

        db.delete_conversation("call-1").unwrap();
        assert!(matches!(
            db.get_conversation("call-1"),
            Err(DbError::ConversationNotFound(_))
        ));
        assert!(matches!(
            db.mark_done("call-1"),
            Err(DbError::ConversationNotFound(_))
        ));

        // Answers do not leak into a later call reusing the id
        db.create_conversation("call-1", "intake").unwrap();
        assert!(db.get_conversation("call-1").unwrap().responses.is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("callflow.db");

        {
            let db = Database::open(&path).unwrap();
            db.add_ruleset(&intake()).unwrap();
            db.create_conversation("call-1", "intake").unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_ruleset("intake").unwrap().steps.len(), 1);
        assert_eq!(db.get_conversation("call-1").unwrap().ruleset_id, "intake");
    }
}
