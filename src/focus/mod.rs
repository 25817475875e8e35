//! Focus flow: the dump → now → interstitial → finish state machine.
//!
//! ```text
//!   dump ──submit (≥1 task)──▶ now ──done──▶ interstitial ──continue──▶ now
//!     ▲                          │ ▲                │
//!     │                    stuck └─┘                └──(last task)──▶ finish
//!     └───────────────────── start fresh ◀──────────────────────────────┘
//! ```
//!
//! Escape attempts run orthogonally: strikes 1 and 2 raise a warning the user
//! must answer, the third attempt ends the session without one.
//!
//! - `task` / `store`: task types and the ordered in-memory task list
//! - `transition`: pure `(state, event) -> effects` function
//! - `controller`: async driver running effects against a `TaskSource`

mod controller;
mod effect;
mod event;
mod state;
mod store;
mod task;
mod transition;

pub use controller::{FlowController, DECOMPOSE_CANCELLED};
pub use effect::{Effect, HistoryNote, SessionOutcome};
pub use event::Event;
pub use state::{EscapeWarning, FocusSnapshot, InFlight, SessionState, View, MAX_WARNED_STRIKES};
pub use store::TaskStore;
pub use task::{ProposedTask, Task, TaskStatus};
pub use transition::{transition, TransitionError, NO_TASKS_FOUND};
