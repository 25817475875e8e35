//! LLM error types.
//!
//! Transient kinds (rate limits, 5xx, network) may be retried by the client
//! when its `RetryConfig` allows it; the rest are returned straight away.

use std::time::Duration;

#[derive(Debug)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    /// HTTP status code, if the request got that far
    pub status_code: Option<u16>,
    pub message: String,
    /// Delay requested by the upstream `Retry-After` header
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn with_kind(kind: LlmErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::with_kind(LlmErrorKind::RateLimited, Some(429), message)
        }
    }

    pub fn server_error(status_code: u16, message: String) -> Self {
        Self::with_kind(LlmErrorKind::ServerError, Some(status_code), message)
    }

    /// Bad request, rejected key, unknown model...
    pub fn client_error(status_code: u16, message: String) -> Self {
        Self::with_kind(LlmErrorKind::ClientError, Some(status_code), message)
    }

    pub fn network_error(message: String) -> Self {
        Self::with_kind(LlmErrorKind::NetworkError, None, message)
    }

    pub fn parse_error(message: String) -> Self {
        Self::with_kind(LlmErrorKind::ParseError, None, message)
    }

    /// No key was supplied; raised before any request is built.
    pub fn missing_api_key() -> Self {
        Self::with_kind(
            LlmErrorKind::MissingApiKey,
            None,
            "OpenRouter API key is missing. Please add it in Settings.".to_string(),
        )
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Delay before retry `attempt` (0-based): `Retry-After` when given,
    /// otherwise exponential backoff from a per-kind base, capped at 60s.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }

        let base_secs: u64 = match self.kind {
            LlmErrorKind::RateLimited => 5,
            LlmErrorKind::ServerError => 2,
            _ => 1,
        };
        let delay_secs = base_secs.saturating_mul(2u64.saturating_pow(attempt));
        let jitter_range = delay_secs / 4;
        let jitter = if jitter_range > 0 {
            (attempt as u64 * 7) % jitter_range
        } else {
            0
        };

        Duration::from_secs((delay_secs + jitter).min(60))
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "OpenRouter API error: {} - {}", code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429
    RateLimited,
    /// 500, 502, 503, 504 and anything unexpected
    ServerError,
    /// Other 4xx
    ClientError,
    /// Connection failed or timed out
    NetworkError,
    /// Body was not a chat completion
    ParseError,
    MissingApiKey,
}

impl LlmErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LlmErrorKind::RateLimited => "Rate limited",
            LlmErrorKind::ServerError => "Server error",
            LlmErrorKind::ClientError => "Client error",
            LlmErrorKind::NetworkError => "Network error",
            LlmErrorKind::ParseError => "Parse error",
            LlmErrorKind::MissingApiKey => "Missing API key",
        };
        f.write_str(label)
    }
}

/// Retry policy for transient errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 0 disables retrying
    pub max_retries: u32,
    /// Upper bound on time spent across all attempts
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryConfig {
    /// Single attempt. The focus flow never retries behind the user's back.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            max_retry_duration: Duration::from_secs(120),
        }
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::none()
        }
    }

    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500 | 502 | 503 | 504 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}
