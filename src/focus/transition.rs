//! Pure transition function for the focus flow.
//!
//! `transition` never performs I/O. It validates an event against the
//! current state, mutates the state only when the event is accepted, and
//! returns the effects the driver must carry out. A rejected event leaves
//! the state untouched.

use thiserror::Error;
use uuid::Uuid;

use super::effect::{Effect, HistoryNote, SessionOutcome};
use super::event::Event;
use super::state::{EscapeWarning, InFlight, SessionState, View, MAX_WARNED_STRIKES};
use super::task::{ProposedTask, Task};

/// Shown when a decomposition comes back without any task.
pub const NO_TASKS_FOUND: &str =
    "Couldn't find any tasks in your brain dump. Try being more specific.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Brain dump text is required")]
    EmptyDump,

    #[error("{event} is not allowed in the {view} view")]
    WrongView { event: &'static str, view: View },

    #[error("No task at index {index}")]
    NoCurrentTask { index: usize },

    #[error("An escape warning is already shown")]
    WarningShown,

    #[error("No escape warning is shown")]
    NoWarning,

    #[error("Another request is still in flight")]
    Busy,

    #[error("{event} does not match the request in flight")]
    Unexpected { event: &'static str },
}

/// Apply `event` to `state`.
pub fn transition(state: &mut SessionState, event: Event) -> Result<Vec<Effect>, TransitionError> {
    if state.is_busy()
        && !event.is_completion()
        && !matches!(event, Event::StartFresh | Event::DismissError)
    {
        return Err(TransitionError::Busy);
    }

    match event {
        Event::SubmitDump(text) => submit_dump(state, text),
        Event::DecomposeSucceeded(proposals) => decompose_succeeded(state, proposals),
        Event::DecomposeFailed(message) => {
            take_decompose(state, "decompose_failed")?;
            state.error = Some(message);
            Ok(Vec::new())
        }
        Event::MarkCurrentDone => mark_current_done(state),
        Event::RequestStuck => request_stuck(state),
        Event::ShrinkSucceeded(proposal) => {
            let index = take_shrink(state, "shrink_succeeded")?;
            state
                .tasks
                .replace(index, proposal.action.clone(), proposal.duration_minutes);
            let task_id = state.tasks.get(index).map(|t| t.id);
            Ok(state
                .session_id
                .zip(task_id)
                .map(|(session_id, task_id)| {
                    Effect::Record(HistoryNote::TaskReplaced {
                        session_id,
                        task_id,
                        action: proposal.action,
                        duration_minutes: proposal.duration_minutes,
                    })
                })
                .into_iter()
                .collect())
        }
        Event::ShrinkFailed(_) => {
            // Stuck is best-effort; the task stays as it was.
            take_shrink(state, "shrink_failed")?;
            Ok(Vec::new())
        }
        Event::ContinueFromInterstitial => continue_from_interstitial(state),
        Event::StartFresh => Ok(start_fresh(state)),
        Event::AttemptEscape => attempt_escape(state),
        Event::ConfirmContinueSession => {
            if state.warning.take().is_none() {
                return Err(TransitionError::NoWarning);
            }
            state.escape_strikes += 1;
            Ok(state
                .session_id
                .map(|session_id| {
                    Effect::Record(HistoryNote::StrikesChanged {
                        session_id,
                        strikes: state.escape_strikes,
                    })
                })
                .into_iter()
                .collect())
        }
        Event::ConfirmLeaveAnyway => {
            if state.warning.is_none() {
                return Err(TransitionError::NoWarning);
            }
            Ok(finish(state, SessionOutcome::Abandoned))
        }
        Event::DismissError => {
            state.error = None;
            Ok(Vec::new())
        }
    }
}

fn require_view(state: &SessionState, view: View, event: &'static str) -> Result<(), TransitionError> {
    if state.view == view {
        Ok(())
    } else {
        Err(TransitionError::WrongView {
            event,
            view: state.view,
        })
    }
}

fn take_decompose(state: &mut SessionState, event: &'static str) -> Result<String, TransitionError> {
    match state.in_flight.take() {
        Some(InFlight::Decompose { dump }) => Ok(dump),
        other => {
            state.in_flight = other;
            Err(TransitionError::Unexpected { event })
        }
    }
}

fn take_shrink(state: &mut SessionState, event: &'static str) -> Result<usize, TransitionError> {
    match state.in_flight.take() {
        Some(InFlight::Shrink { index }) => Ok(index),
        other => {
            state.in_flight = other;
            Err(TransitionError::Unexpected { event })
        }
    }
}

fn submit_dump(state: &mut SessionState, text: String) -> Result<Vec<Effect>, TransitionError> {
    if text.trim().is_empty() {
        return Err(TransitionError::EmptyDump);
    }
    require_view(state, View::Dump, "submit_dump")?;

    state.error = None;
    state.in_flight = Some(InFlight::Decompose { dump: text.clone() });
    Ok(vec![Effect::Decompose { text }])
}

fn decompose_succeeded(
    state: &mut SessionState,
    proposals: Vec<ProposedTask>,
) -> Result<Vec<Effect>, TransitionError> {
    let dump = take_decompose(state, "decompose_succeeded")?;

    if proposals.is_empty() {
        state.error = Some(NO_TASKS_FOUND.to_string());
        return Ok(Vec::new());
    }

    let tasks: Vec<Task> = proposals.into_iter().map(Task::from_proposal).collect();
    let session_id = Uuid::new_v4();
    state.tasks.set_tasks(tasks.clone());
    state.current_index = 0;
    state.view = View::Now;
    state.session_id = Some(session_id);

    Ok(vec![Effect::Record(HistoryNote::SessionStarted {
        session_id,
        dump,
        tasks,
    })])
}

fn mark_current_done(state: &mut SessionState) -> Result<Vec<Effect>, TransitionError> {
    require_view(state, View::Now, "mark_current_done")?;
    let index = state.current_index;
    let task_id = state
        .tasks
        .get(index)
        .map(|t| t.id)
        .ok_or(TransitionError::NoCurrentTask { index })?;

    state.tasks.mark_done(index);
    state.view = View::Interstitial;

    Ok(state
        .session_id
        .map(|session_id| Effect::Record(HistoryNote::TaskCompleted { session_id, task_id }))
        .into_iter()
        .collect())
}

fn request_stuck(state: &mut SessionState) -> Result<Vec<Effect>, TransitionError> {
    require_view(state, View::Now, "request_stuck")?;
    let index = state.current_index;
    let action = state
        .tasks
        .get(index)
        .map(|t| t.action.clone())
        .ok_or(TransitionError::NoCurrentTask { index })?;

    state.in_flight = Some(InFlight::Shrink { index });
    Ok(vec![Effect::Shrink { index, action }])
}

fn continue_from_interstitial(state: &mut SessionState) -> Result<Vec<Effect>, TransitionError> {
    require_view(state, View::Interstitial, "continue_from_interstitial")?;

    let next = state.current_index + 1;
    if next < state.tasks.len() {
        state.current_index = next;
        state.view = View::Now;
        Ok(Vec::new())
    } else {
        Ok(finish(state, SessionOutcome::Completed))
    }
}

fn attempt_escape(state: &mut SessionState) -> Result<Vec<Effect>, TransitionError> {
    if state.warning.is_some() {
        return Err(TransitionError::WarningShown);
    }

    if state.escape_strikes < MAX_WARNED_STRIKES {
        state.warning = Some(EscapeWarning {
            strike: state.escape_strikes + 1,
        });
        Ok(Vec::new())
    } else {
        // Third attempt: no warning, the session just ends.
        Ok(finish(state, SessionOutcome::Abandoned))
    }
}

fn start_fresh(state: &mut SessionState) -> Vec<Effect> {
    let effects = state
        .session_id
        .map(|session_id| {
            Effect::Record(HistoryNote::SessionEnded {
                session_id,
                outcome: SessionOutcome::Abandoned,
            })
        })
        .into_iter()
        .collect();
    *state = SessionState::new();
    effects
}

fn finish(state: &mut SessionState, outcome: SessionOutcome) -> Vec<Effect> {
    state.view = View::Finish;
    state.escape_strikes = 0;
    state.warning = None;
    state
        .session_id
        .take()
        .map(|session_id| Effect::Record(HistoryNote::SessionEnded { session_id, outcome }))
        .into_iter()
        .collect()
}
