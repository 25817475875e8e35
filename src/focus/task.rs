//! Task types shared by the flow controller, the task source and the API.
//!
//! # Invariants
//! - `action` is non-empty after trimming
//! - `duration_minutes > 0`
//! - `id` is unique within a focus session

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task inside a focus session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet completed
    Pending,
    /// Marked done by the user
    Done,
    /// Reserved; no transition currently produces it
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Done => "done",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "done" => TaskStatus::Done,
            "skipped" => TaskStatus::Skipped,
            _ => TaskStatus::Pending,
        }
    }
}

/// A task proposed by the AI task source, before it joins a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProposedTask {
    pub action: String,
    pub duration_minutes: u32,
}

impl ProposedTask {
    pub fn new(action: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            action: action.into(),
            duration_minutes,
        }
    }
}

/// A task owned by a focus session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub action: String,
    pub duration_minutes: u32,
    pub status: TaskStatus,
}

impl Task {
    /// Materialize a proposal with a fresh id and `pending` status.
    pub fn from_proposal(proposal: ProposedTask) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: proposal.action,
            duration_minutes: proposal.duration_minutes,
            status: TaskStatus::Pending,
        }
    }
}
