//! In-memory task store for a single focus session.
//!
//! Index-taking operations treat an out-of-range index as a controller bug
//! and panic instead of corrupting the sequence.

use serde::Serialize;

use super::task::{Task, TaskStatus};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole sequence. Order is kept as given.
    pub fn set_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    pub fn mark_done(&mut self, index: usize) {
        let len = self.tasks.len();
        assert!(index < len, "mark_done: index {} out of range (len {})", index, len);
        self.tasks[index].status = TaskStatus::Done;
    }

    /// Swap in a replacement action/duration. Id, status and position are kept.
    pub fn replace(&mut self, index: usize, action: String, duration_minutes: u32) {
        let len = self.tasks.len();
        assert!(index < len, "replace: index {} out of range (len {})", index, len);
        let task = &mut self.tasks[index];
        task.action = action;
        task.duration_minutes = duration_minutes;
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn get(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }
}
