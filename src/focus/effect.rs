//! Side effects requested by the focus state machine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::Task;

/// How a populated session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Every task was worked through
    Completed,
    /// Left early (escape or start fresh)
    Abandoned,
}

/// Notifications for the history store. Never affect flow state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryNote {
    SessionStarted {
        session_id: Uuid,
        dump: String,
        tasks: Vec<Task>,
    },
    TaskCompleted {
        session_id: Uuid,
        task_id: Uuid,
    },
    /// A stuck task was swapped for a smaller one; the id is unchanged.
    TaskReplaced {
        session_id: Uuid,
        task_id: Uuid,
        action: String,
        duration_minutes: u32,
    },
    StrikesChanged {
        session_id: Uuid,
        strikes: u8,
    },
    SessionEnded {
        session_id: Uuid,
        outcome: SessionOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ask the task source to break `text` into tasks.
    Decompose { text: String },
    /// Ask the task source for a smaller version of the task at `index`.
    Shrink { index: usize, action: String },
    Record(HistoryNote),
}
