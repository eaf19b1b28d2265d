//! SQLite persistence for cognitivesense-daemon.
//!
//! Only closed sessions are persisted. The active session lives in memory and
//! is lost on restart.

use rusqlite::{params, Connection, OpenFlags};
use session_core::Session;
use std::path::PathBuf;

pub const ARCHIVE_NAMESPACE: &str = "cognitivesense-session";

pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    /// Stores an archived session and prunes the namespace to `keep` rows,
    /// newest by end time.
    pub fn archive_session(&self, session: &Session, keep: usize) -> Result<usize, String> {
        let payload = session
            .to_archive_payload()
            .map_err(|err| format!("Failed to serialize session payload: {}", err))?;
        let ended_at = session.end_time.unwrap_or(session.start_time);

        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin archive transaction: {}", err))?;
            tx.execute(
                "INSERT OR REPLACE INTO archived_sessions \
                    (namespace, session_id, started_at, ended_at, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    ARCHIVE_NAMESPACE,
                    session.id,
                    session.start_time,
                    ended_at,
                    payload
                ],
            )
            .map_err(|err| format!("Failed to insert archived session: {}", err))?;

            let pruned = tx
                .execute(
                    "DELETE FROM archived_sessions \
                     WHERE namespace = ?1 AND rowid NOT IN ( \
                        SELECT rowid FROM archived_sessions \
                        WHERE namespace = ?1 \
                        ORDER BY ended_at DESC, rowid DESC \
                        LIMIT ?2 \
                     )",
                    params![ARCHIVE_NAMESPACE, keep.max(1) as i64],
                )
                .map_err(|err| format!("Failed to prune archived sessions: {}", err))?;

            tx.commit()
                .map_err(|err| format!("Failed to commit archived session: {}", err))?;
            Ok(pruned)
        })
    }

    /// Archived sessions, newest first. Rows whose payload no longer decodes
    /// are skipped with a warning.
    pub fn load_archived_sessions(&self, limit: usize) -> Result<Vec<Session>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, payload FROM archived_sessions \
                     WHERE namespace = ?1 \
                     ORDER BY ended_at DESC, rowid DESC \
                     LIMIT ?2",
                )
                .map_err(|err| format!("Failed to prepare archive query: {}", err))?;

            let rows = stmt
                .query_map(params![ARCHIVE_NAMESPACE, limit as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|err| format!("Failed to read archive rows: {}", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                let (session_id, payload) =
                    row.map_err(|err| format!("Failed to decode archive row: {}", err))?;
                match Session::from_archive_payload(&payload) {
                    Ok(session) => sessions.push(session),
                    Err(err) => {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %err,
                            "Skipping unreadable archived session"
                        );
                    }
                }
            }
            Ok(sessions)
        })
    }

    pub fn archived_count(&self) -> Result<usize, String> {
        let count = self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM archived_sessions WHERE namespace = ?1",
                params![ARCHIVE_NAMESPACE],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|err| format!("Failed to count archived sessions: {}", err))
        })?;
        Ok(count.max(0) as usize)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS archived_sessions (
                    namespace TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    ended_at INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (namespace, session_id)
                 );
                 CREATE INDEX IF NOT EXISTS idx_archived_sessions_ended_at
                    ON archived_sessions(namespace, ended_at);
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}
