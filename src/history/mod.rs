//! Focus session history with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database, one file shared by all users

mod memory;
mod sqlite;

pub use memory::InMemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::focus::{HistoryNote, SessionOutcome, Task, TaskStatus};

/// Lifecycle of a recorded focus session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Active,
    Completed,
    Abandoned,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Active => "active",
            HistoryStatus::Completed => "completed",
            HistoryStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => HistoryStatus::Completed,
            "abandoned" => HistoryStatus::Abandoned,
            _ => HistoryStatus::Active,
        }
    }
}

impl From<SessionOutcome> for HistoryStatus {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Completed => HistoryStatus::Completed,
            SessionOutcome::Abandoned => HistoryStatus::Abandoned,
        }
    }
}

/// A past or running focus session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySession {
    pub id: Uuid,
    pub user_id: String,
    pub raw_dump: String,
    pub status: HistoryStatus,
    pub escape_strikes: u8,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub tasks: Vec<HistoryTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTask {
    /// Same id as the live task
    pub id: Uuid,
    pub order: u32,
    pub action: String,
    pub duration_minutes: u32,
    pub status: TaskStatus,
}

impl HistoryTask {
    fn from_task(order: usize, task: &Task) -> Self {
        Self {
            id: task.id,
            order: order as u32,
            action: task.action.clone(),
            duration_minutes: task.duration_minutes,
            status: task.status,
        }
    }
}

/// Current timestamp as fixed-width RFC3339, so string order is time order.
pub fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// History store trait - implemented by all storage backends.
///
/// Updates addressed to an unknown session are ignored.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    async fn start_session(
        &self,
        user_id: &str,
        session_id: Uuid,
        raw_dump: &str,
        tasks: &[Task],
    ) -> Result<(), String>;

    async fn complete_task(&self, session_id: Uuid, task_id: Uuid) -> Result<(), String>;

    async fn replace_task(
        &self,
        session_id: Uuid,
        task_id: Uuid,
        action: &str,
        duration_minutes: u32,
    ) -> Result<(), String>;

    async fn set_escape_strikes(&self, session_id: Uuid, strikes: u8) -> Result<(), String>;

    /// Close a session. Only an `active` session changes status.
    async fn end_session(&self, session_id: Uuid, status: HistoryStatus) -> Result<(), String>;

    /// A user's sessions, newest first.
    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<HistorySession>, String>;

    async fn get_session(&self, id: Uuid) -> Result<Option<HistorySession>, String>;

    /// Apply one flow notification.
    async fn record(&self, user_id: &str, note: HistoryNote) -> Result<(), String> {
        match note {
            HistoryNote::SessionStarted {
                session_id,
                dump,
                tasks,
            } => self.start_session(user_id, session_id, &dump, &tasks).await,
            HistoryNote::TaskCompleted {
                session_id,
                task_id,
            } => self.complete_task(session_id, task_id).await,
            HistoryNote::TaskReplaced {
                session_id,
                task_id,
                action,
                duration_minutes,
            } => {
                self.replace_task(session_id, task_id, &action, duration_minutes)
                    .await
            }
            HistoryNote::StrikesChanged {
                session_id,
                strikes,
            } => self.set_escape_strikes(session_id, strikes).await,
            HistoryNote::SessionEnded {
                session_id,
                outcome,
            } => self.end_session(session_id, outcome.into()).await,
        }
    }
}

/// History store type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryStoreType {
    Memory,
    #[default]
    Sqlite,
}

impl HistoryStoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }
}

/// Create a history store based on type, keeping its files in `data_dir`.
pub async fn create_history_store(
    store_type: HistoryStoreType,
    data_dir: &Path,
) -> Result<Box<dyn HistoryStore>, String> {
    match store_type {
        HistoryStoreType::Memory => Ok(Box::new(InMemoryHistoryStore::new())),
        HistoryStoreType::Sqlite => {
            let store = SqliteHistoryStore::new(data_dir.join("history.db")).await?;
            Ok(Box::new(store))
        }
    }
}
