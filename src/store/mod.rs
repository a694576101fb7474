//! Durable session registry backed by SQLite.
//!
//! One row per logical session, unique on (name, working_directory). Every
//! write is an autocommit statement, so it is on disk before the call returns.
//! The database runs in WAL mode with a busy timeout so separate short-lived
//! `clux` invocations can race on the same file.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::data::{Session, SessionStatus};
use crate::util::{Clock, SystemClock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session '{name}' already exists in {working_directory}")]
    Duplicate {
        name: String,
        working_directory: String,
    },

    #[error("No session with id {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    claude_session_id TEXT,
    working_directory TEXT NOT NULL,
    tmux_session TEXT,
    status TEXT NOT NULL DEFAULT 'idle',
    created_at TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    archived_at TEXT,
    UNIQUE(name, working_directory)
);

CREATE INDEX IF NOT EXISTS idx_sessions_directory ON sessions(working_directory);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
"#;

const COLUMNS: &str = "id, name, working_directory, status, created_at, last_activity, \
                       archived_at, tmux_session, claude_session_id";

pub struct SessionStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Open (or create) the registry at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory registry for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "Opened session registry");
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used for `created_at` / `last_activity` / `archived_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current time at the precision the registry stores.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    pub fn create(
        &self,
        name: &str,
        working_directory: &str,
        tmux_session: Option<&str>,
    ) -> StoreResult<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = self.now();
        let stamp = encode_ts(now);

        let inserted = self.conn.execute(
            "INSERT INTO sessions (id, name, working_directory, tmux_session, status, created_at, last_activity)
             VALUES (?1, ?2, ?3, ?4, 'idle', ?5, ?5)",
            params![id, name, working_directory, tmux_session, stamp],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                tracing::debug!("Session already exists: {} in {}", name, working_directory);
                return Err(StoreError::Duplicate {
                    name: name.to_string(),
                    working_directory: working_directory.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Session {
            id,
            name: name.to_string(),
            working_directory: working_directory.to_string(),
            status: SessionStatus::Idle,
            created_at: now,
            last_activity: now,
            archived_at: None,
            tmux_session: tmux_session.map(String::from),
            claude_session_id: None,
        })
    }

    pub fn get(&self, name: &str, working_directory: &str) -> StoreResult<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE name = ?1 AND working_directory = ?2",
            COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![name, working_directory], row_to_session)
            .optional()?)
    }

    pub fn get_by_id(&self, id: &str) -> StoreResult<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], row_to_session)
            .optional()?)
    }

    pub fn get_by_tmux_name(&self, tmux_session: &str) -> StoreResult<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE tmux_session = ?1", COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![tmux_session], row_to_session)
            .optional()?)
    }

    /// Sessions ordered by `last_activity`, newest first.
    pub fn list(
        &self,
        include_archived: bool,
        working_directory: Option<&str>,
    ) -> StoreResult<Vec<Session>> {
        let mut sql = format!("SELECT {} FROM sessions", COLUMNS);
        let mut conditions = Vec::new();
        let mut args = Vec::new();

        if !include_archived {
            conditions.push("status != 'archived'");
        }
        if let Some(dir) = working_directory {
            conditions.push("working_directory = ?");
            args.push(dir);
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY last_activity DESC, rowid DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params_from_iter(args), row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Set the status and stamp `last_activity`, returning the stamp written.
    ///
    /// `archived_at` is stamped when moving to `archived` and cleared for
    /// every other status.
    pub fn set_status(&self, id: &str, status: SessionStatus) -> StoreResult<DateTime<Utc>> {
        let now = self.now();
        let stamp = encode_ts(now);
        let archived_at = (status == SessionStatus::Archived).then(|| stamp.clone());
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?1, last_activity = ?2, archived_at = ?3 WHERE id = ?4",
            params![status.as_str(), stamp, archived_at, id],
        )?;
        ensure_changed(changed, id)?;
        Ok(now)
    }

    /// Record the tmux session name backing a row.
    pub fn set_tmux_session(&self, id: &str, tmux_session: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET tmux_session = ?1 WHERE id = ?2",
            params![tmux_session, id],
        )?;
        ensure_changed(changed, id)
    }

    pub fn set_claude_session_id(&self, id: &str, claude_session_id: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET claude_session_id = ?1 WHERE id = ?2",
            params![claude_session_id, id],
        )?;
        ensure_changed(changed, id)
    }

    pub fn touch_activity(&self, id: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET last_activity = ?1 WHERE id = ?2",
            params![encode_ts(self.now()), id],
        )?;
        ensure_changed(changed, id)
    }

    /// Bring an archived session back as `idle`, whatever it was before archiving.
    pub fn restore(&self, id: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET status = 'idle', archived_at = NULL WHERE id = ?1",
            params![id],
        )?;
        ensure_changed(changed, id)
    }

    /// Permanently remove a session row.
    pub fn delete(&self, id: &str) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        ensure_changed(changed, id)
    }
}

fn ensure_changed(changed: usize, id: &str) -> StoreResult<()> {
    if changed == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Fixed-width RFC 3339, so text order in SQLite equals time order.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<SessionStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    let created_at: String = row.get(4)?;
    let last_activity: String = row.get(5)?;
    let archived_at: Option<String> = row.get(6)?;

    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        working_directory: row.get(2)?,
        status,
        created_at: decode_ts(4, &created_at)?,
        last_activity: decode_ts(5, &last_activity)?,
        archived_at: archived_at.as_deref().map(|s| decode_ts(6, s)).transpose()?,
        tmux_session: row.get(7)?,
        claude_session_id: row.get(8)?,
    })
}
