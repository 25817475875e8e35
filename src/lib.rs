//! # What Now
//!
//! Brain dump in, one small task out.
//!
//! The user writes down everything on their mind; an LLM (via OpenRouter)
//! breaks it into a handful of small, concrete tasks, and the focus flow
//! walks through them one at a time. Leaving early is allowed but costs an
//! escape strike, and the third attempt ends the session.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum) ──▶ FlowController ──▶ transition(state, event) -> effects
//!                        │
//!                        ├──▶ TaskSource (OpenRouter chat completions)
//!                        └──▶ HistoryStore (sqlite / memory)
//! ```
//!
//! ## Modules
//! - `focus`: the single-task state machine and its async driver
//! - `task_source`: prompts, response parsing and the OpenRouter-backed source
//! - `llm`: OpenRouter chat completion client
//! - `history`: recorded focus sessions
//! - `accounts`: users, password hashes and encrypted API keys
//! - `api`: HTTP routes and auth middleware

pub mod accounts;
pub mod api;
pub mod config;
pub mod crypto;
pub mod focus;
pub mod history;
pub mod llm;
pub mod task_source;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::Config;
