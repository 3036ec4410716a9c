use std::{collections::HashSet, fs, path::Path, sync::Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use super::{SessionClose, SessionInfo};
use crate::{now_unix_s, CatalogEntry, CloseReason, SessionStatus};

const SESSIONS_SCHEMA_MIGRATIONS: [(&str, &str); 3] = [
    (
        "close_reason",
        "ALTER TABLE sessions ADD COLUMN close_reason TEXT;",
    ),
    (
        "errors",
        "ALTER TABLE sessions ADD COLUMN errors INTEGER NOT NULL DEFAULT 0;",
    ),
    (
        "data_path",
        "ALTER TABLE sessions ADD COLUMN data_path TEXT NOT NULL DEFAULT '';",
    ),
];

fn status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Open => "open",
        SessionStatus::Closed => "closed",
    }
}

fn status_from_str(value: &str) -> Result<SessionStatus, String> {
    match value {
        "open" => Ok(SessionStatus::Open),
        "closed" => Ok(SessionStatus::Closed),
        other => Err(format!("unknown session status in db: {other}")),
    }
}

/// SQLite index of every session that has reached storage.
///
/// Frame data lives in the per-session array directories; this table only
/// tracks lifecycle and counters so closed sessions stay queryable.
pub(crate) struct SessionCatalog {
    conn: Mutex<Connection>,
}

impl SessionCatalog {
    /// Open (or create) `{data_dir}/sessions.db`.
    ///
    /// Sessions still marked `open` belong to a previous process and are
    /// closed with reason `server_restarted`.
    pub(crate) fn open(data_dir: &Path) -> Result<Self, String> {
        fs::create_dir_all(data_dir)
            .map_err(|e| format!("failed to create data dir {}: {e}", data_dir.display()))?;

        let db_path = data_dir.join("sessions.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| format!("failed to open SQLite at {}: {e}", db_path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;",
        )
        .map_err(|e| format!("failed to set pragmas: {e}"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id      TEXT PRIMARY KEY,
                username        TEXT NOT NULL,
                client_ip       TEXT NOT NULL,
                status          TEXT NOT NULL,
                started_at      REAL NOT NULL,
                last_flush_at   REAL,
                closed_at       REAL,
                frames_written  INTEGER NOT NULL DEFAULT 0,
                frame_count     INTEGER NOT NULL DEFAULT 0,
                valid_frames    INTEGER NOT NULL DEFAULT 0,
                errors          INTEGER NOT NULL DEFAULT 0,
                close_reason    TEXT,
                data_path       TEXT NOT NULL DEFAULT ''
             );
             CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);",
        )
        .map_err(|e| format!("failed to create schema: {e}"))?;

        Self::ensure_sessions_schema(&conn)?;

        let catalog = Self {
            conn: Mutex::new(conn),
        };

        let recovered = catalog.recover_on_startup()?;
        if recovered > 0 {
            tracing::warn!(recovered, "closed sessions left open by a previous run");
        }

        Ok(catalog)
    }

    fn ensure_sessions_schema(conn: &Connection) -> Result<(), String> {
        let mut columns = Self::sessions_columns(conn)?;
        for (column, migration_sql) in SESSIONS_SCHEMA_MIGRATIONS {
            if columns.contains(column) {
                continue;
            }

            tracing::warn!(column, "applying sessions table migration");
            conn.execute_batch(migration_sql)
                .map_err(|e| format!("failed to add sessions.{column}: {e}"))?;
            columns.insert(column.to_string());
        }
        Ok(())
    }

    fn sessions_columns(conn: &Connection) -> Result<HashSet<String>, String> {
        let mut stmt = conn
            .prepare("PRAGMA table_info(sessions)")
            .map_err(|e| format!("failed to read sessions table info: {e}"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| format!("failed to iterate sessions columns: {e}"))?;

        let mut columns = HashSet::new();
        for row in rows {
            columns.insert(row.map_err(|e| format!("failed to parse sessions column info: {e}"))?);
        }
        Ok(columns)
    }

    fn recover_on_startup(&self) -> Result<usize, String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET status = 'closed', closed_at = ?1, close_reason = ?2
             WHERE status = 'open'",
            params![now_unix_s(), CloseReason::ServerRestarted.as_str()],
        )
        .map_err(|e| format!("recover_on_startup failed: {e}"))
    }

    /// Upsert after a successful flush. Reopens a session that was closed.
    pub(crate) fn record_flush(
        &self,
        session: &SessionInfo,
        data_path: &Path,
        frames_written: u64,
    ) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (
                session_id, username, client_ip, status, started_at, last_flush_at,
                frames_written, data_path
             ) VALUES (?1, ?2, ?3, 'open', ?4, ?5, ?6, ?7)
             ON CONFLICT(session_id) DO UPDATE SET
                status = 'open',
                last_flush_at = excluded.last_flush_at,
                frames_written = excluded.frames_written,
                closed_at = NULL,
                close_reason = NULL",
            params![
                session.session_id,
                session.username,
                session.client_ip,
                session.start_time,
                now_unix_s(),
                frames_written as i64,
                data_path.to_string_lossy().into_owned(),
            ],
        )
        .map_err(|e| format!("record_flush failed: {e}"))?;
        Ok(())
    }

    /// Mark a session closed with its final counters. Returns false when the
    /// session never reached storage.
    pub(crate) fn record_close(&self, session_id: &str, close: &SessionClose) -> Result<bool, String> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE sessions SET status = 'closed', closed_at = ?1, close_reason = ?2,
                        frame_count = ?3, valid_frames = ?4, errors = ?5
                 WHERE session_id = ?6",
                params![
                    close.end_time,
                    close.reason.as_str(),
                    close.frame_count as i64,
                    close.valid_frames as i64,
                    close.errors as i64,
                    session_id,
                ],
            )
            .map_err(|e| format!("record_close failed: {e}"))?;
        Ok(updated > 0)
    }

    pub(crate) fn get(&self, session_id: &str) -> Result<Option<CatalogEntry>, String> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT session_id, username, client_ip, status, started_at, last_flush_at,
                        closed_at, frames_written, frame_count, valid_frames, errors,
                        close_reason, data_path
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        CatalogEntry {
                            session_id: row.get(0)?,
                            username: row.get(1)?,
                            client_ip: row.get(2)?,
                            status: SessionStatus::Open,
                            started_at: row.get(4)?,
                            last_flush_at: row.get(5)?,
                            closed_at: row.get(6)?,
                            frames_written: row.get::<_, i64>(7)? as u64,
                            frame_count: row.get::<_, i64>(8)? as u64,
                            valid_frames: row.get::<_, i64>(9)? as u64,
                            errors: row.get::<_, i64>(10)? as u64,
                            close_reason: row.get(11)?,
                            data_path: row.get(12)?,
                        },
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| format!("catalog lookup failed: {e}"))?;

        let Some((mut entry, status)) = row else {
            return Ok(None);
        };
        entry.status = status_from_str(&status)?;
        Ok(Some(entry))
    }

    /// Returns (open, closed, total).
    pub(crate) fn count_by_status(&self) -> Result<(usize, usize, usize), String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "SELECT
                     COUNT(*) FILTER (WHERE status = '{}'),
                     COUNT(*) FILTER (WHERE status = '{}'),
                     COUNT(*)
                 FROM sessions",
                status_to_str(SessionStatus::Open),
                status_to_str(SessionStatus::Closed),
            ),
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as usize,
                    row.get::<_, i64>(1)? as usize,
                    row.get::<_, i64>(2)? as usize,
                ))
            },
        )
        .map_err(|e| format!("count_by_status failed: {e}"))
    }
}
