//! SQLite-based history store.

use super::{now_string, HistorySession, HistoryStatus, HistoryStore, HistoryTask};
use crate::focus::{Task, TaskStatus};
use crate::util::uuid_column;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    raw_dump TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    escape_strikes INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    ended_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_user_created ON sessions(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    action TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(session_id, position);
"#;

pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create history store dir: {}", e))?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open SQLite database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, String> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    fn load_tasks(conn: &Connection, session_id: &str) -> Result<Vec<HistoryTask>, String> {
        let mut stmt = conn
            .prepare(
                "SELECT id, position, action, duration_minutes, status
                 FROM tasks WHERE session_id = ?1 ORDER BY position",
            )
            .map_err(|e| e.to_string())?;
        let tasks = stmt
            .query_map(params![session_id], |row| {
                let status: String = row.get(4)?;
                Ok(HistoryTask {
                    id: uuid_column(row, 0)?,
                    order: row.get(1)?,
                    action: row.get(2)?,
                    duration_minutes: row.get(3)?,
                    status: TaskStatus::parse(&status),
                })
            })
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(tasks)
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistorySession> {
        let status: String = row.get(3)?;
        Ok(HistorySession {
            id: uuid_column(row, 0)?,
            user_id: row.get(1)?,
            raw_dump: row.get(2)?,
            status: HistoryStatus::parse(&status),
            escape_strikes: row.get(4)?,
            created_at: row.get(5)?,
            ended_at: row.get(6)?,
            tasks: Vec::new(),
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, user_id, raw_dump, status, escape_strikes, created_at, ended_at";

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn start_session(
        &self,
        user_id: &str,
        session_id: Uuid,
        raw_dump: &str,
        tasks: &[Task],
    ) -> Result<(), String> {
        let user_id = user_id.to_string();
        let raw_dump = raw_dump.to_string();
        let tasks = tasks.to_vec();
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| e.to_string())?;
            tx.execute(
                "INSERT INTO sessions (id, user_id, raw_dump, status, escape_strikes, created_at)
                 VALUES (?1, ?2, ?3, 'active', 0, ?4)",
                params![&session_id, &user_id, &raw_dump, now_string()],
            )
            .map_err(|e| e.to_string())?;
            for (position, task) in tasks.iter().enumerate() {
                tx.execute(
                    "INSERT INTO tasks (id, session_id, position, action, duration_minutes, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        task.id.to_string(),
                        &session_id,
                        position as i64,
                        &task.action,
                        task.duration_minutes,
                        task.status.as_str()
                    ],
                )
                .map_err(|e| e.to_string())?;
            }
            tx.commit().map_err(|e| e.to_string())
        })
        .await
    }

    async fn complete_task(&self, session_id: Uuid, task_id: Uuid) -> Result<(), String> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE tasks SET status = 'done' WHERE id = ?1 AND session_id = ?2",
                params![task_id.to_string(), session_id.to_string()],
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
        })
        .await
    }

    async fn replace_task(
        &self,
        session_id: Uuid,
        task_id: Uuid,
        action: &str,
        duration_minutes: u32,
    ) -> Result<(), String> {
        let action = action.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE tasks SET action = ?1, duration_minutes = ?2
                 WHERE id = ?3 AND session_id = ?4",
                params![
                    &action,
                    duration_minutes,
                    task_id.to_string(),
                    session_id.to_string()
                ],
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
        })
        .await
    }

    async fn set_escape_strikes(&self, session_id: Uuid, strikes: u8) -> Result<(), String> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET escape_strikes = ?1 WHERE id = ?2",
                params![strikes, session_id.to_string()],
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
        })
        .await
    }

    async fn end_session(&self, session_id: Uuid, status: HistoryStatus) -> Result<(), String> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sessions SET status = ?1, ended_at = ?2
                 WHERE id = ?3 AND status = 'active'",
                params![status.as_str(), now_string(), session_id.to_string()],
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
        })
        .await
    }

    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<HistorySession>, String> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM sessions WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    SESSION_COLUMNS
                ))
                .map_err(|e| e.to_string())?;
            let mut sessions = stmt
                .query_map(params![&user_id, limit as i64], Self::row_to_session)
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            for session in &mut sessions {
                session.tasks = Self::load_tasks(conn, &session.id.to_string())?;
            }
            Ok(sessions)
        })
        .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<HistorySession>, String> {
        self.with_conn(move |conn| {
            let id_str = id.to_string();
            let session = conn
                .query_row(
                    &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                    params![&id_str],
                    Self::row_to_session,
                )
                .optional()
                .map_err(|e| e.to_string())?;
            match session {
                Some(mut s) => {
                    s.tasks = Self::load_tasks(conn, &id_str)?;
                    Ok(Some(s))
                }
                None => Ok(None),
            }
        })
        .await
    }
}
