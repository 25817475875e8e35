//! Configuration management for whatnow.
//!
//! Configuration is read from environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `WORKING_DIR` - Optional. Base directory; data lives in `<WORKING_DIR>/.whatnow/`.
//! - `DATABASE_PATH` - Optional. Accounts database. Defaults to `<data dir>/whatnow.db`.
//! - `HISTORY_STORE` - Optional. `sqlite` (default) or `memory`.
//! - `JWT_SECRET` - Required unless `DEV_MODE` is on. Signs session tokens.
//! - `JWT_TTL_DAYS` - Optional. Session lifetime. Defaults to `7`.
//! - `COOKIE_SECURE` - Optional. Mark the session cookie `Secure`. Defaults to `false`.
//! - `DEFAULT_MODEL` - Optional. Defaults to `google/gemini-2.0-flash-exp:free`.
//! - `OPENROUTER_BASE_URL` - Optional. Defaults to `https://openrouter.ai/api/v1`.
//! - `APP_URL` - Optional. Sent as `HTTP-Referer`. Defaults to `http://localhost:3000`.
//! - `LLM_TIMEOUT_SECS` - Optional. Per-request timeout. Defaults to `60`.
//! - `LLM_MAX_RETRIES` - Optional. Retries of transient upstream errors. Defaults to `0`.
//! - `PRIVATE_KEY` - Optional. 32-byte hex/base64 key for API key encryption;
//!   otherwise loaded from or created at `<data dir>/private_key`.
//! - `DEV_MODE` - Optional. Generates a throwaway JWT secret when none is set.

use std::path::PathBuf;
use std::time::Duration;

use rand::RngCore;
use thiserror::Error;

use crate::history::HistoryStoreType;
use crate::llm::OPENROUTER_BASE_URL;
use crate::util::env_var_bool;

pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp:free";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Session token settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret for session JWTs
    pub jwt_secret: String,

    /// Session lifetime in days
    pub jwt_ttl_days: i64,

    /// Add `Secure` to the session cookie
    pub cookie_secure: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// `<WORKING_DIR>/.whatnow`
    pub data_dir: PathBuf,

    pub database_path: PathBuf,
    pub history_store: HistoryStoreType,

    pub auth: AuthConfig,

    /// Default LLM model identifier (OpenRouter format)
    pub default_model: String,
    pub openrouter_base_url: String,
    pub app_url: String,
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,

    /// Raw `PRIVATE_KEY` value, parsed when the key store is opened
    pub private_key: Option<String>,

    pub dev_mode: bool,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        _ => Ok(default),
    }
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `JWT_SECRET` is not set outside
    /// dev mode, and `ConfigError::InvalidValue` for unparsable numbers.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dev_mode = env_var_bool("DEV_MODE", false);

        let working_dir = std::env::var("WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let data_dir = working_dir.join(".whatnow");

        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("whatnow.db"));

        let jwt_secret = match std::env::var("JWT_SECRET").ok().filter(|s| !s.trim().is_empty()) {
            Some(secret) => secret,
            None if dev_mode => {
                tracing::warn!("JWT_SECRET not set; using a random secret (sessions end on restart)");
                random_secret()
            }
            None => return Err(ConfigError::MissingEnvVar("JWT_SECRET".to_string())),
        };

        let jwt_ttl_days: i64 = env_parse("JWT_TTL_DAYS", 7)?;
        if jwt_ttl_days < 1 {
            return Err(ConfigError::InvalidValue(
                "JWT_TTL_DAYS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            host: env_or("HOST", "127.0.0.1"),
            port: env_parse("PORT", 3000)?,
            data_dir,
            database_path,
            history_store: HistoryStoreType::from_str(&env_or("HISTORY_STORE", "sqlite")),
            auth: AuthConfig {
                jwt_secret,
                jwt_ttl_days,
                cookie_secure: env_var_bool("COOKIE_SECURE", false),
            },
            default_model: env_or("DEFAULT_MODEL", DEFAULT_MODEL),
            openrouter_base_url: env_or("OPENROUTER_BASE_URL", OPENROUTER_BASE_URL),
            app_url: env_or("APP_URL", "http://localhost:3000"),
            llm_timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 60)?),
            llm_max_retries: env_parse("LLM_MAX_RETRIES", 0)?,
            private_key: std::env::var("PRIVATE_KEY").ok(),
            dev_mode,
        })
    }

    /// Path of the generated encryption key when `PRIVATE_KEY` is unset.
    pub fn private_key_path(&self) -> PathBuf {
        self.data_dir.join("private_key")
    }

    /// Defaults rooted at `working_dir`, with in-memory history and a fixed secret.
    #[cfg(test)]
    pub fn for_tests(working_dir: PathBuf) -> Self {
        let data_dir = working_dir.join(".whatnow");
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_path: data_dir.join("whatnow.db"),
            data_dir,
            history_store: HistoryStoreType::Memory,
            auth: AuthConfig {
                jwt_secret: "test-secret".to_string(),
                jwt_ttl_days: 7,
                cookie_secure: false,
            },
            default_model: DEFAULT_MODEL.to_string(),
            openrouter_base_url: OPENROUTER_BASE_URL.to_string(),
            app_url: "http://localhost:3000".to_string(),
            llm_timeout: Duration::from_secs(5),
            llm_max_retries: 0,
            private_key: None,
            dev_mode: false,
        }
    }
}
