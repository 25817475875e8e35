//! Task source backed by an OpenRouter chat model.

use std::sync::Arc;

use async_trait::async_trait;

use super::parse::{parse_single_task, parse_task_list};
use super::prompts::{
    decompose_user_prompt, shrink_user_prompt, DECOMPOSE_SYSTEM_PROMPT, SHRINK_SYSTEM_PROMPT,
};
use super::{TaskSource, TaskSourceError, TaskSourceFactory};
use crate::config::Config;
use crate::focus::ProposedTask;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, OpenRouterClient, RetryConfig};

const TEMPERATURE: f64 = 0.5;
const MAX_TOKENS: u64 = 1024;

pub struct OpenRouterTaskSource {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl OpenRouterTaskSource {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    async fn ask(&self, system: &str, user: String) -> Result<String, TaskSourceError> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let options = ChatOptions {
            temperature: Some(TEMPERATURE),
            max_tokens: Some(MAX_TOKENS),
        };
        let response = self
            .llm
            .chat_completion_with_options(&self.model, &messages, options)
            .await?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "OpenRouter call finished"
            );
        }
        Ok(response.content)
    }
}

#[async_trait]
impl TaskSource for OpenRouterTaskSource {
    async fn decompose(&self, text: &str) -> Result<Vec<ProposedTask>, TaskSourceError> {
        let raw = self
            .ask(DECOMPOSE_SYSTEM_PROMPT, decompose_user_prompt(text))
            .await?;
        parse_task_list(&raw)
    }

    async fn shrink(&self, action: &str) -> Result<ProposedTask, TaskSourceError> {
        let raw = self
            .ask(SHRINK_SYSTEM_PROMPT, shrink_user_prompt(action))
            .await?;
        parse_single_task(&raw)
    }
}

/// Builds OpenRouter task sources sharing one HTTP connection pool.
pub struct OpenRouterTaskSourceFactory {
    http: reqwest::Client,
    base_url: String,
    referer: String,
    model: String,
    retry_config: RetryConfig,
}

impl OpenRouterTaskSourceFactory {
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.llm_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.openrouter_base_url.clone(),
            referer: config.app_url.clone(),
            model: config.default_model.clone(),
            retry_config: RetryConfig::with_max_retries(config.llm_max_retries),
        })
    }
}

impl TaskSourceFactory for OpenRouterTaskSourceFactory {
    fn for_key(&self, api_key: &str) -> Arc<dyn TaskSource> {
        let client = OpenRouterClient::with_client(self.http.clone(), api_key.to_string())
            .with_base_url(self.base_url.clone())
            .with_referer(self.referer.clone())
            .with_retry_config(self.retry_config.clone());
        Arc::new(OpenRouterTaskSource::new(Arc::new(client), self.model.clone()))
    }
}
