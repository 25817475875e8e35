//! Focus session state and its read-only projection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::store::TaskStore;
use super::task::Task;

/// Strikes after which the next escape attempt ends the session outright.
pub const MAX_WARNED_STRIKES: u8 = 2;

/// Which screen the presentation layer should show.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Dump,
    Now,
    Interstitial,
    Finish,
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            View::Dump => write!(f, "dump"),
            View::Now => write!(f, "now"),
            View::Interstitial => write!(f, "interstitial"),
            View::Finish => write!(f, "finish"),
        }
    }
}

/// The AI call a session is currently waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InFlight {
    Decompose { dump: String },
    Shrink { index: usize },
}

/// Escape warning awaiting the user's answer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct EscapeWarning {
    /// The strike that confirming "continue" would record (1 or 2).
    pub strike: u8,
}

/// Complete state of one focus session.
///
/// Mutated only by [`super::transition`].
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// History record id; set while a populated session is running.
    pub session_id: Option<Uuid>,
    pub tasks: TaskStore,
    pub current_index: usize,
    pub view: View,
    /// Confirmed "continue" answers to escape warnings, in `0..=2`.
    pub escape_strikes: u8,
    pub warning: Option<EscapeWarning>,
    /// Last user-facing error, cleared on dismiss or the next dump.
    pub error: Option<String>,
    pub in_flight: Option<InFlight>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_task(&self) -> Option<&Task> {
        match self.view {
            View::Now | View::Interstitial => self.tasks.get(self.current_index),
            View::Dump | View::Finish => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Read-only projection handed to the presentation layer.
    pub fn snapshot(&self) -> FocusSnapshot {
        FocusSnapshot {
            view: self.view,
            tasks: self.tasks.as_slice().to_vec(),
            current_index: self.current_index,
            current_task: self.current_task().cloned(),
            escape_strikes: self.escape_strikes,
            warning: self.warning,
            error: self.error.clone(),
            busy: self.is_busy(),
            session_id: self.session_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSnapshot {
    pub view: View,
    pub tasks: Vec<Task>,
    pub current_index: usize,
    pub current_task: Option<Task>,
    pub escape_strikes: u8,
    pub warning: Option<EscapeWarning>,
    pub error: Option<String>,
    pub busy: bool,
    pub session_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_empty_dump() {
        let state = SessionState::new();
        assert_eq!(state.view, View::Dump);
        assert!(state.tasks.is_empty());
        assert_eq!(state.current_index, 0);
        assert_eq!(state.escape_strikes, 0);
        assert!(state.warning.is_none());
        assert!(!state.is_busy());
    }

    #[test]
    fn snapshot_serializes_view_and_warning() {
        let mut state = SessionState::new();
        state.warning = Some(EscapeWarning { strike: 1 });
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["view"], "dump");
        assert_eq!(json["warning"]["strike"], 1);
        assert_eq!(json["currentTask"], serde_json::Value::Null);
        assert_eq!(json["escapeStrikes"], 0);
    }
}
