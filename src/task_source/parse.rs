//! Turning raw model output into proposed tasks.
//!
//! Models sometimes wrap their JSON in a markdown fence even when told not to,
//! so the fence is stripped before parsing. Any item that breaks the task
//! invariants (blank action, non-positive duration) rejects the whole response.

use serde::Deserialize;

use super::{TaskSourceError, MAX_TASKS};
use crate::focus::ProposedTask;

pub const TASKS_PARSE_ERROR: &str = "Failed to parse tasks from AI response";
pub const SHRINK_PARSE_ERROR: &str = "Failed to parse shrunk task from AI response";

/// Loose shape of one model item; durations may come back as floats.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    action: String,
    duration_minutes: f64,
}

impl RawTask {
    fn validate(self) -> Option<ProposedTask> {
        let action = self.action.trim();
        if action.is_empty() || !self.duration_minutes.is_finite() || self.duration_minutes <= 0.0 {
            return None;
        }
        let minutes = self.duration_minutes.ceil().min(u32::MAX as f64) as u32;
        Some(ProposedTask::new(action, minutes))
    }
}

/// Strip surrounding whitespace and a markdown code fence.
pub fn clean_response(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    }
    if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Parse a decomposition response: a JSON array of tasks, at most
/// [`MAX_TASKS`] kept.
pub fn parse_task_list(raw: &str) -> Result<Vec<ProposedTask>, TaskSourceError> {
    let fail = || {
        tracing::error!("Failed to parse AI response: {}", raw);
        TaskSourceError::Parse(TASKS_PARSE_ERROR.to_string())
    };

    let items: Vec<RawTask> = serde_json::from_str(clean_response(raw)).map_err(|_| fail())?;
    let mut tasks = items
        .into_iter()
        .map(RawTask::validate)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(fail)?;

    if tasks.len() > MAX_TASKS {
        tracing::warn!(
            "Model returned {} tasks, keeping the first {}",
            tasks.len(),
            MAX_TASKS
        );
        tasks.truncate(MAX_TASKS);
    }
    Ok(tasks)
}

/// Parse a shrink response: a single JSON task object.
pub fn parse_single_task(raw: &str) -> Result<ProposedTask, TaskSourceError> {
    serde_json::from_str::<RawTask>(clean_response(raw))
        .ok()
        .and_then(RawTask::validate)
        .ok_or_else(|| {
            tracing::error!("Failed to parse AI response: {}", raw);
            TaskSourceError::Parse(SHRINK_PARSE_ERROR.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_fences() {
        assert_eq!(clean_response("  [1]  "), "[1]");
        assert_eq!(clean_response("```json\n[1]\n```"), "[1]");
        assert_eq!(clean_response("```\n{\"a\": 1}\n```\n"), "{\"a\": 1}");
        assert_eq!(clean_response("[1]\n```"), "[1]");
    }

    #[test]
    fn parses_fenced_task_list() {
        let raw = r#"```json
[
  {"action": "Email Bob about the report", "durationMinutes": 5},
  {"action": "Clear off your desk surface", "durationMinutes": 10}
]
```"#;
        let tasks = parse_task_list(raw).unwrap();
        assert_eq!(
            tasks,
            vec![
                ProposedTask::new("Email Bob about the report", 5),
                ProposedTask::new("Clear off your desk surface", 10),
            ]
        );
    }

    #[test]
    fn empty_array_is_not_an_error() {
        assert!(parse_task_list("[]").unwrap().is_empty());
    }

    #[test]
    fn long_lists_are_truncated() {
        let items: Vec<String> = (1..=9)
            .map(|i| format!(r#"{{"action": "Step {}", "durationMinutes": 5}}"#, i))
            .collect();
        let raw = format!("[{}]", items.join(","));

        let tasks = parse_task_list(&raw).unwrap();
        assert_eq!(tasks.len(), MAX_TASKS);
        assert_eq!(tasks[0].action, "Step 1");
        assert_eq!(tasks[6].action, "Step 7");
    }

    #[test]
    fn invalid_items_reject_the_whole_list() {
        for raw in [
            r#"[{"action": "  ", "durationMinutes": 5}]"#,
            r#"[{"action": "Call mom", "durationMinutes": 0}]"#,
            r#"[{"action": "Call mom", "durationMinutes": -3}]"#,
            r#"[{"action": "Call mom"}]"#,
            r#"{"action": "Call mom", "durationMinutes": 5}"#,
            "Sure! Here are your tasks:",
        ] {
            let err = parse_task_list(raw).unwrap_err();
            assert_eq!(err.to_string(), TASKS_PARSE_ERROR, "input: {}", raw);
        }
    }

    #[test]
    fn fractional_durations_round_up() {
        let tasks = parse_task_list(r#"[{"action": "Stretch", "durationMinutes": 2.5}]"#).unwrap();
        assert_eq!(tasks[0].duration_minutes, 3);
    }

    #[test]
    fn parses_single_task() {
        let task = parse_single_task(
            "```json\n{\"action\": \"Just open the document and write ONE sentence\", \"durationMinutes\": 3}\n```",
        )
        .unwrap();
        assert_eq!(task.action, "Just open the document and write ONE sentence");
        assert_eq!(task.duration_minutes, 3);

        let err = parse_single_task("[]").unwrap_err();
        assert_eq!(err, TaskSourceError::Parse(SHRINK_PARSE_ERROR.to_string()));
    }
}
