//! AI task source: turns a brain dump into tasks and shrinks a single task.
//!
//! The flow controller only sees the [`TaskSource`] trait. The production
//! implementation talks to OpenRouter with one user's key; the API layer asks
//! a [`TaskSourceFactory`] for a source bound to the signed-in user's key.

mod openrouter;
mod parse;
pub mod prompts;

pub use openrouter::{OpenRouterTaskSource, OpenRouterTaskSourceFactory};
pub use parse::{clean_response, parse_single_task, parse_task_list, SHRINK_PARSE_ERROR, TASKS_PARSE_ERROR};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::focus::ProposedTask;
use crate::llm::{LlmError, LlmErrorKind};

/// Upper bound on tasks kept from one decomposition.
pub const MAX_TASKS: usize = 7;

/// Failure of a task source call. Displays as the user-facing message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskSourceError {
    #[error("OpenRouter API key is missing. Please add it in Settings.")]
    MissingApiKey,

    /// Upstream answered with an error status or an unreadable body
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Network(String),

    /// The model answered but not in the expected task shape
    #[error("{0}")]
    Parse(String),
}

impl From<LlmError> for TaskSourceError {
    fn from(err: LlmError) -> Self {
        match err.kind {
            LlmErrorKind::MissingApiKey => TaskSourceError::MissingApiKey,
            LlmErrorKind::NetworkError => TaskSourceError::Network(err.to_string()),
            _ => TaskSourceError::Upstream(err.to_string()),
        }
    }
}

#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Break free text into at most [`MAX_TASKS`] tasks in execution order.
    async fn decompose(&self, text: &str) -> Result<Vec<ProposedTask>, TaskSourceError>;

    /// Propose a smaller first step for `action`.
    async fn shrink(&self, action: &str) -> Result<ProposedTask, TaskSourceError>;
}

/// Builds a task source bound to one user's API key.
pub trait TaskSourceFactory: Send + Sync {
    fn for_key(&self, api_key: &str) -> Arc<dyn TaskSource>;
}
