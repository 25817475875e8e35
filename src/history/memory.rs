//! In-memory history store (non-persistent).

use super::{now_string, HistorySession, HistoryStatus, HistoryStore, HistoryTask};
use crate::focus::{Task, TaskStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone)]
pub struct InMemoryHistoryStore {
    sessions: Arc<RwLock<HashMap<Uuid, HistorySession>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn update<F>(&self, id: Uuid, f: F)
    where
        F: FnOnce(&mut HistorySession),
    {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            f(session);
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn start_session(
        &self,
        user_id: &str,
        session_id: Uuid,
        raw_dump: &str,
        tasks: &[Task],
    ) -> Result<(), String> {
        let session = HistorySession {
            id: session_id,
            user_id: user_id.to_string(),
            raw_dump: raw_dump.to_string(),
            status: HistoryStatus::Active,
            escape_strikes: 0,
            created_at: now_string(),
            ended_at: None,
            tasks: tasks
                .iter()
                .enumerate()
                .map(|(i, t)| HistoryTask::from_task(i, t))
                .collect(),
        };
        self.sessions.write().await.insert(session_id, session);
        Ok(())
    }

    async fn complete_task(&self, session_id: Uuid, task_id: Uuid) -> Result<(), String> {
        self.update(session_id, |s| {
            if let Some(task) = s.tasks.iter_mut().find(|t| t.id == task_id) {
                task.status = TaskStatus::Done;
            }
        })
        .await;
        Ok(())
    }

    async fn replace_task(
        &self,
        session_id: Uuid,
        task_id: Uuid,
        action: &str,
        duration_minutes: u32,
    ) -> Result<(), String> {
        self.update(session_id, |s| {
            if let Some(task) = s.tasks.iter_mut().find(|t| t.id == task_id) {
                task.action = action.to_string();
                task.duration_minutes = duration_minutes;
            }
        })
        .await;
        Ok(())
    }

    async fn set_escape_strikes(&self, session_id: Uuid, strikes: u8) -> Result<(), String> {
        self.update(session_id, |s| s.escape_strikes = strikes).await;
        Ok(())
    }

    async fn end_session(&self, session_id: Uuid, status: HistoryStatus) -> Result<(), String> {
        self.update(session_id, |s| {
            if s.status == HistoryStatus::Active {
                s.status = status;
                s.ended_at = Some(now_string());
            }
        })
        .await;
        Ok(())
    }

    async fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<HistorySession>, String> {
        let mut sessions: Vec<HistorySession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<HistorySession>, String> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::store_tests;

    #[tokio::test]
    async fn session_lifecycle() {
        store_tests::session_lifecycle(&InMemoryHistoryStore::new()).await;
    }

    #[tokio::test]
    async fn listing_is_per_user_and_newest_first() {
        store_tests::listing_is_per_user_and_newest_first(&InMemoryHistoryStore::new()).await;
    }

    #[tokio::test]
    async fn unknown_sessions_are_ignored() {
        let store = InMemoryHistoryStore::new();
        assert!(!store.is_persistent());
        store_tests::unknown_sessions_are_ignored(&store).await;
    }
}
