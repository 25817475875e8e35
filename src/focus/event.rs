//! Inputs to the focus state machine: user intents and effect completions.

use super::task::ProposedTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // User intents
    SubmitDump(String),
    MarkCurrentDone,
    RequestStuck,
    ContinueFromInterstitial,
    StartFresh,
    AttemptEscape,
    ConfirmContinueSession,
    ConfirmLeaveAnyway,
    DismissError,

    // Effect completions
    DecomposeSucceeded(Vec<ProposedTask>),
    DecomposeFailed(String),
    ShrinkSucceeded(ProposedTask),
    ShrinkFailed(String),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::SubmitDump(_) => "submit_dump",
            Event::MarkCurrentDone => "mark_current_done",
            Event::RequestStuck => "request_stuck",
            Event::ContinueFromInterstitial => "continue_from_interstitial",
            Event::StartFresh => "start_fresh",
            Event::AttemptEscape => "attempt_escape",
            Event::ConfirmContinueSession => "confirm_continue_session",
            Event::ConfirmLeaveAnyway => "confirm_leave_anyway",
            Event::DismissError => "dismiss_error",
            Event::DecomposeSucceeded(_) => "decompose_succeeded",
            Event::DecomposeFailed(_) => "decompose_failed",
            Event::ShrinkSucceeded(_) => "shrink_succeeded",
            Event::ShrinkFailed(_) => "shrink_failed",
        }
    }

    /// Whether this event reports the outcome of an AI call.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            Event::DecomposeSucceeded(_)
                | Event::DecomposeFailed(_)
                | Event::ShrinkSucceeded(_)
                | Event::ShrinkFailed(_)
        )
    }
}
