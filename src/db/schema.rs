use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| AppError::Internal(format!("Failed to configure database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            -- Reading progress table
            CREATE TABLE IF NOT EXISTS reading_progress (
                user_id TEXT NOT NULL,
                work_id TEXT NOT NULL,
                current_chapter INTEGER NOT NULL,
                current_position INTEGER NOT NULL DEFAULT 0,
                is_completed INTEGER NOT NULL DEFAULT 0,
                last_read_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, work_id)
            );

            -- Read chapters, one row per (user, work, chapter)
            CREATE TABLE IF NOT EXISTS chapters_read (
                user_id TEXT NOT NULL,
                work_id TEXT NOT NULL,
                chapter_number INTEGER NOT NULL,
                PRIMARY KEY (user_id, work_id, chapter_number),
                FOREIGN KEY (user_id, work_id)
                    REFERENCES reading_progress(user_id, work_id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            CREATE INDEX IF NOT EXISTS idx_progress_recent ON reading_progress(user_id, last_read_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== SESSION OPERATIONS ==========

    /// Create a new session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// List all sessions, soonest expiry first.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT token, user_id, expires_at FROM sessions ORDER BY expires_at")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let sessions = stmt
            .query_map([], |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list sessions: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect sessions: {}", e)))?;

        Ok(sessions)
    }

    /// Delete a session.
    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now_timestamp()],
            )
            .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))?;
        Ok(deleted)
    }

    // ========== PROGRESS OPERATIONS ==========

    /// Record a reading position in one atomic step.
    ///
    /// Creates the record on first write. Afterwards the chapter and
    /// position are overwritten (last write wins) while the chapter is
    /// added to the read set, which only ever grows. Both statements run in
    /// one `IMMEDIATE` transaction so concurrent writers serialize on the
    /// database lock instead of interleaving.
    pub fn upsert_progress(
        &self,
        user_id: &str,
        work_id: &str,
        chapter_number: i64,
        position: i64,
        at: i64,
    ) -> Result<ReadingProgress> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::RemoteUpsert(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO reading_progress
             (user_id, work_id, current_chapter, current_position, is_completed, last_read_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT (user_id, work_id) DO UPDATE SET
                current_chapter = excluded.current_chapter,
                current_position = excluded.current_position,
                last_read_at = excluded.last_read_at",
            params![user_id, work_id, chapter_number, position, at],
        )
        .map_err(|e| AppError::RemoteUpsert(format!("Failed to save progress: {}", e)))?;

        tx.execute(
            "INSERT OR IGNORE INTO chapters_read (user_id, work_id, chapter_number)
             VALUES (?1, ?2, ?3)",
            params![user_id, work_id, chapter_number],
        )
        .map_err(|e| AppError::RemoteUpsert(format!("Failed to mark chapter read: {}", e)))?;

        let progress = load_progress(&tx, user_id, work_id)
            .map_err(|e| AppError::RemoteUpsert(format!("Failed to reload progress: {}", e)))?
            .ok_or_else(|| AppError::RemoteUpsert("Progress vanished after upsert".to_string()))?;

        tx.commit()
            .map_err(|e| AppError::RemoteUpsert(format!("Failed to commit progress: {}", e)))?;

        Ok(progress)
    }

    /// Set or clear the completion flag, creating the record if needed.
    pub fn set_completed(
        &self,
        user_id: &str,
        work_id: &str,
        completed: bool,
        at: i64,
    ) -> Result<ReadingProgress> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::RemoteUpsert(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO reading_progress
             (user_id, work_id, current_chapter, current_position, is_completed, last_read_at)
             VALUES (?1, ?2, 0, 0, ?3, ?4)
             ON CONFLICT (user_id, work_id) DO UPDATE SET
                is_completed = excluded.is_completed,
                last_read_at = excluded.last_read_at",
            params![user_id, work_id, completed, at],
        )
        .map_err(|e| AppError::RemoteUpsert(format!("Failed to set completion: {}", e)))?;

        let progress = load_progress(&tx, user_id, work_id)
            .map_err(|e| AppError::RemoteUpsert(format!("Failed to reload progress: {}", e)))?
            .ok_or_else(|| AppError::RemoteUpsert("Progress vanished after upsert".to_string()))?;

        tx.commit()
            .map_err(|e| AppError::RemoteUpsert(format!("Failed to commit progress: {}", e)))?;

        Ok(progress)
    }

    /// Get reading progress for a work.
    pub fn get_progress(&self, user_id: &str, work_id: &str) -> Result<Option<ReadingProgress>> {
        let conn = self.conn.lock();
        load_progress(&conn, user_id, work_id)
            .map_err(|e| AppError::Internal(format!("Failed to get progress: {}", e)))
    }

    /// All progress records of a user, most recently read first.
    pub fn list_progress(&self, user_id: &str) -> Result<Vec<ReadingProgress>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT work_id FROM reading_progress
                 WHERE user_id = ?1
                 ORDER BY last_read_at DESC, work_id",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let work_ids = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Internal(format!("Failed to list progress: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect progress: {}", e)))?;

        let mut records = Vec::with_capacity(work_ids.len());
        for work_id in work_ids {
            if let Some(progress) = load_progress(&conn, user_id, &work_id)
                .map_err(|e| AppError::Internal(format!("Failed to get progress: {}", e)))?
            {
                records.push(progress);
            }
        }

        Ok(records)
    }
}

/// Read one progress record with its read set.
fn load_progress(
    conn: &Connection,
    user_id: &str,
    work_id: &str,
) -> rusqlite::Result<Option<ReadingProgress>> {
    let row = conn
        .query_row(
            "SELECT current_chapter, current_position, is_completed, last_read_at
             FROM reading_progress WHERE user_id = ?1 AND work_id = ?2",
            params![user_id, work_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((current_chapter, current_position, is_completed, last_read_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT chapter_number FROM chapters_read
         WHERE user_id = ?1 AND work_id = ?2
         ORDER BY chapter_number",
    )?;
    let chapters_read = stmt
        .query_map(params![user_id, work_id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(ReadingProgress {
        user_id: user_id.to_string(),
        work_id: work_id.to_string(),
        current_chapter,
        current_position,
        chapters_read,
        is_completed,
        last_read_at,
    }))
}
