//! Async driver around the focus state machine.
//!
//! Feeds one intent at a time into [`transition`], runs the AI calls the
//! transition asks for, and feeds their outcome back in. History notes are
//! forwarded to the history store; a failed write is logged and never
//! changes the flow.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::effect::{Effect, HistoryNote};
use super::event::Event;
use super::state::{FocusSnapshot, SessionState, View};
use super::transition::{transition, TransitionError};
use crate::history::HistoryStore;
use crate::task_source::TaskSource;

/// Error recorded when a decomposition is abandoned before it answered.
pub const DECOMPOSE_CANCELLED: &str = "The request was cancelled before the tasks arrived. Please try again.";

/// Clears the request in flight if the AI call it guards never completes,
/// e.g. because the HTTP request driving the dispatch was dropped.
struct InFlightGuard<'a> {
    state: &'a mut SessionState,
    on_abandon: Option<Event>,
}

impl<'a> InFlightGuard<'a> {
    fn new(state: &'a mut SessionState, on_abandon: Event) -> Self {
        Self {
            state,
            on_abandon: Some(on_abandon),
        }
    }

    fn disarm(mut self) {
        self.on_abandon = None;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.on_abandon.take() {
            warn!(event = event.name(), "AI call abandoned, releasing the flow");
            if let Err(e) = transition(self.state, event) {
                warn!("Could not release abandoned request: {}", e);
            }
        }
    }
}

pub struct FlowController {
    user_id: String,
    state: SessionState,
    source: Arc<dyn TaskSource>,
    history: Option<Arc<dyn HistoryStore>>,
    last_active: Instant,
}

impl FlowController {
    pub fn new(
        user_id: impl Into<String>,
        source: Arc<dyn TaskSource>,
        history: Option<Arc<dyn HistoryStore>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            state: SessionState::new(),
            source,
            history,
            last_active: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> FocusSnapshot {
        self.state.snapshot()
    }

    /// Untouched for `ttl` with no AI call pending and no task in progress.
    pub fn is_idle(&self, ttl: Duration) -> bool {
        !self.state.is_busy()
            && matches!(self.state.view, View::Dump | View::Finish)
            && self.last_active.elapsed() >= ttl
    }

    /// Swap the task source (e.g. after the user changed their API key).
    pub fn set_source(&mut self, source: Arc<dyn TaskSource>) {
        self.source = source;
    }

    /// Process one intent to completion, including any AI call it triggers.
    pub async fn dispatch(&mut self, event: Event) -> Result<FocusSnapshot, TransitionError> {
        let name = event.name();
        self.last_active = Instant::now();
        let mut pending: VecDeque<Effect> = transition(&mut self.state, event)?.into();
        debug!(user = %self.user_id, event = name, view = %self.state.view, "Focus event applied");

        while let Some(effect) = pending.pop_front() {
            let completion = match effect {
                Effect::Decompose { text } => {
                    let guard = InFlightGuard::new(
                        &mut self.state,
                        Event::DecomposeFailed(DECOMPOSE_CANCELLED.to_string()),
                    );
                    let completion = run_decompose(self.source.as_ref(), &self.user_id, &text).await;
                    guard.disarm();
                    completion
                }
                Effect::Shrink { index, action } => {
                    let guard = InFlightGuard::new(
                        &mut self.state,
                        Event::ShrinkFailed("cancelled".to_string()),
                    );
                    let completion =
                        run_shrink(self.source.as_ref(), &self.user_id, index, &action).await;
                    guard.disarm();
                    completion
                }
                Effect::Record(note) => {
                    self.record(note).await;
                    continue;
                }
            };

            match transition(&mut self.state, completion) {
                Ok(more) => pending.extend(more),
                Err(e) => warn!(user = %self.user_id, "Dropped stale completion: {}", e),
            }
        }

        Ok(self.snapshot())
    }

    async fn record(&self, note: HistoryNote) {
        let Some(history) = &self.history else {
            return;
        };
        if let Err(e) = history.record(&self.user_id, note).await {
            warn!(user = %self.user_id, "Failed to write focus history: {}", e);
        }
    }

    pub async fn submit_dump(&mut self, text: impl Into<String>) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::SubmitDump(text.into())).await
    }

    pub async fn mark_current_done(&mut self) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::MarkCurrentDone).await
    }

    pub async fn request_stuck(&mut self) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::RequestStuck).await
    }

    pub async fn continue_from_interstitial(&mut self) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::ContinueFromInterstitial).await
    }

    pub async fn start_fresh(&mut self) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::StartFresh).await
    }

    pub async fn attempt_escape(&mut self) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::AttemptEscape).await
    }

    pub async fn confirm_continue_session(&mut self) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::ConfirmContinueSession).await
    }

    pub async fn confirm_leave_anyway(&mut self) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::ConfirmLeaveAnyway).await
    }

    pub async fn dismiss_error(&mut self) -> Result<FocusSnapshot, TransitionError> {
        self.dispatch(Event::DismissError).await
    }
}

async fn run_decompose(source: &dyn TaskSource, user_id: &str, text: &str) -> Event {
    match source.decompose(text).await {
        Ok(tasks) => {
            info!(user = %user_id, "Brain dump decomposed into {} tasks", tasks.len());
            Event::DecomposeSucceeded(tasks)
        }
        Err(e) => {
            tracing::error!(user = %user_id, "Error breaking tasks: {}", e);
            Event::DecomposeFailed(e.to_string())
        }
    }
}

async fn run_shrink(source: &dyn TaskSource, user_id: &str, index: usize, action: &str) -> Event {
    match source.shrink(action).await {
        Ok(task) => {
            info!(user = %user_id, index, "Task shrunk to {:?}", task.action);
            Event::ShrinkSucceeded(task)
        }
        Err(e) => {
            warn!(user = %user_id, index, "Error shrinking task: {}", e);
            Event::ShrinkFailed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::{ProposedTask, SessionOutcome, TaskStatus, View, NO_TASKS_FOUND};
    use crate::history::{HistoryStatus, InMemoryHistoryStore};
    use crate::task_source::testing::ScriptedTaskSource;
    use crate::task_source::TaskSourceError;

    fn controller(source: Arc<ScriptedTaskSource>) -> FlowController {
        FlowController::new("user-1", source, None)
    }

    #[tokio::test]
    async fn blank_dump_never_reaches_the_source() {
        let source = Arc::new(ScriptedTaskSource::new());
        let mut flow = controller(Arc::clone(&source));

        let err = flow.submit_dump("   ").await.unwrap_err();
        assert_eq!(err, TransitionError::EmptyDump);
        assert_eq!(source.decompose_calls(), 0);
    }

    #[tokio::test]
    async fn dump_settles_on_first_task() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.push_decompose(Ok(vec![
            ProposedTask::new("Email Bob about the report", 5),
            ProposedTask::new("Clear off your desk surface", 10),
        ]));
        let mut flow = controller(Arc::clone(&source));

        let snap = flow.submit_dump("email Bob, clean desk").await.unwrap();
        assert_eq!(snap.view, View::Now);
        assert_eq!(snap.current_index, 0);
        assert!(!snap.busy);
        assert_eq!(
            snap.current_task.unwrap().action,
            "Email Bob about the report"
        );
        assert_eq!(source.last_dump().as_deref(), Some("email Bob, clean desk"));
    }

    #[tokio::test]
    async fn empty_and_failed_decompositions_stay_in_dump() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.push_decompose(Ok(Vec::new()));
        source.push_decompose(Err(TaskSourceError::Parse(
            "Failed to parse tasks from AI response".to_string(),
        )));
        let mut flow = controller(Arc::clone(&source));

        let snap = flow.submit_dump("something").await.unwrap();
        assert_eq!(snap.view, View::Dump);
        assert_eq!(snap.error.as_deref(), Some(NO_TASKS_FOUND));

        let snap = flow.submit_dump("something else").await.unwrap();
        assert_eq!(snap.view, View::Dump);
        assert_eq!(
            snap.error.as_deref(),
            Some("Failed to parse tasks from AI response")
        );
        assert!(snap.tasks.is_empty());

        let snap = flow.dismiss_error().await.unwrap();
        assert!(snap.error.is_none());
    }

    #[tokio::test]
    async fn stuck_success_and_failure() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.push_decompose(Ok(vec![ProposedTask::new("Write the report", 15)]));
        source.push_shrink(Err(TaskSourceError::Network("connection reset".to_string())));
        source.push_shrink(Ok(ProposedTask::new("Open the report file", 2)));
        let mut flow = controller(Arc::clone(&source));
        flow.submit_dump("report").await.unwrap();

        let snap = flow.request_stuck().await.unwrap();
        assert!(snap.error.is_none());
        assert_eq!(snap.tasks[0].action, "Write the report");

        let snap = flow.request_stuck().await.unwrap();
        assert_eq!(snap.tasks[0].action, "Open the report file");
        assert_eq!(snap.tasks[0].duration_minutes, 2);
        assert_eq!(snap.tasks[0].status, TaskStatus::Pending);
        assert_eq!(snap.view, View::Now);
        assert_eq!(source.shrink_calls(), 2);
    }

    #[tokio::test]
    async fn abandoned_shrink_releases_the_flow() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.push_decompose(Ok(vec![ProposedTask::new("Write the report", 15)]));
        let mut flow = controller(Arc::clone(&source));
        flow.submit_dump("report").await.unwrap();

        source.hang_shrink();
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), flow.request_stuck()).await;
        assert!(abandoned.is_err());

        let snap = flow.snapshot();
        assert!(!snap.busy);
        assert!(snap.error.is_none());
        assert_eq!(snap.tasks[0].action, "Write the report");

        let snap = flow.mark_current_done().await.unwrap();
        assert_eq!(snap.view, View::Interstitial);
    }

    #[tokio::test]
    async fn abandoned_decompose_stays_in_dump_with_an_error() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.hang_decompose();
        let mut flow = controller(Arc::clone(&source));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), flow.submit_dump("report")).await;
        assert!(abandoned.is_err());

        let snap = flow.snapshot();
        assert!(!snap.busy);
        assert_eq!(snap.view, View::Dump);
        assert_eq!(snap.error.as_deref(), Some(DECOMPOSE_CANCELLED));
        assert!(flow.is_idle(Duration::ZERO));
    }

    #[tokio::test]
    async fn idle_only_outside_a_running_session() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.push_decompose(Ok(vec![ProposedTask::new("a", 5)]));
        let mut flow = controller(Arc::clone(&source));
        assert!(flow.is_idle(Duration::ZERO));
        assert!(!flow.is_idle(Duration::from_secs(3600)));

        flow.submit_dump("a").await.unwrap();
        assert!(!flow.is_idle(Duration::ZERO));
        flow.mark_current_done().await.unwrap();
        flow.continue_from_interstitial().await.unwrap();
        assert!(flow.is_idle(Duration::ZERO));
    }

    #[tokio::test]
    async fn full_session_is_recorded_in_history() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.push_decompose(Ok(vec![
            ProposedTask::new("Email Bob about the report", 5),
            ProposedTask::new("Clear off your desk surface", 10),
        ]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let mut flow = FlowController::new(
            "user-1",
            Arc::clone(&source) as Arc<dyn TaskSource>,
            Some(Arc::clone(&history) as Arc<dyn HistoryStore>),
        );

        let snap = flow.submit_dump("email Bob, clean desk").await.unwrap();
        let session_id = snap.session_id.unwrap();
        flow.mark_current_done().await.unwrap();
        flow.continue_from_interstitial().await.unwrap();
        flow.mark_current_done().await.unwrap();
        let snap = flow.continue_from_interstitial().await.unwrap();
        assert_eq!(snap.view, View::Finish);

        let record = history.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(record.status, HistoryStatus::Completed);
        assert_eq!(record.raw_dump, "email Bob, clean desk");
        assert!(record.tasks.iter().all(|t| t.status == TaskStatus::Done));
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn escaping_abandons_the_recorded_session() {
        let source = Arc::new(ScriptedTaskSource::new());
        source.push_decompose(Ok(vec![ProposedTask::new("a", 5)]));
        let history = Arc::new(InMemoryHistoryStore::new());
        let mut flow = FlowController::new(
            "user-1",
            source,
            Some(Arc::clone(&history) as Arc<dyn HistoryStore>),
        );

        let session_id = flow.submit_dump("a").await.unwrap().session_id.unwrap();
        flow.attempt_escape().await.unwrap();
        flow.confirm_continue_session().await.unwrap();
        let record = history.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(record.escape_strikes, 1);

        flow.attempt_escape().await.unwrap();
        let snap = flow.confirm_leave_anyway().await.unwrap();
        assert_eq!(snap.view, View::Finish);
        assert_eq!(snap.escape_strikes, 0);

        let record = history.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(record.status, HistoryStatus::from(SessionOutcome::Abandoned));
    }
}
