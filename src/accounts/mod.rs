//! User accounts: email/password credentials and each user's OpenRouter key.
//!
//! Stored in SQLite. Emails are trimmed and lowercased before they are stored
//! or looked up. The OpenRouter key is encrypted at rest when a private key
//! is configured.

mod password;

pub use password::{hash_password, verify_password};

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::crypto::{decrypt_value, encrypt_value, PrivateKey};
use crate::util::uuid_column;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    email TEXT NOT NULL UNIQUE,
    name TEXT,
    password_hash TEXT NOT NULL,
    openrouter_key TEXT,
    created_at TEXT NOT NULL
);
"#;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("An account with this email already exists")]
    DuplicateEmail,

    #[error("Account storage error: {0}")]
    Storage(String),

    #[error("Failed to protect API key: {0}")]
    Crypto(String),
}

impl From<rusqlite::Error> for AccountError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AccountError::DuplicateEmail
            }
            _ => AccountError::Storage(err.to_string()),
        }
    }
}

/// Public view of an account.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
    key: Option<PrivateKey>,
}

impl UserStore {
    pub async fn open(db_path: PathBuf, key: Option<PrivateKey>) -> Result<Self, AccountError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AccountError::Storage(format!("Failed to create data dir: {}", e)))?;
        }
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, AccountError>(conn)
        })
        .await
        .map_err(|e| AccountError::Storage(format!("Task join error: {}", e)))??;
        Ok(Self::from_connection(conn, key))
    }

    pub fn open_in_memory(key: Option<PrivateKey>) -> Result<Self, AccountError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn, key))
    }

    fn from_connection(conn: Connection, key: Option<PrivateKey>) -> Self {
        if key.is_none() {
            tracing::warn!("No private key configured; OpenRouter keys are stored in plaintext");
        }
        Self {
            conn: Arc::new(Mutex::new(conn)),
            key,
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, AccountError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AccountError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| AccountError::Storage(format!("Task join error: {}", e)))?
    }

    fn seal(&self, api_key: &str) -> Result<String, AccountError> {
        match &self.key {
            Some(key) => encrypt_value(key, api_key).map_err(|e| AccountError::Crypto(e.to_string())),
            None => Ok(api_key.to_string()),
        }
    }

    fn unseal(&self, stored: &str) -> Result<String, AccountError> {
        match &self.key {
            Some(key) => decrypt_value(key, stored).map_err(|e| AccountError::Crypto(e.to_string())),
            None => Ok(stored.to_string()),
        }
    }

    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        openrouter_key: &str,
    ) -> Result<User, AccountError> {
        let user = User {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            name: name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
        };
        let sealed = self.seal(openrouter_key.trim())?;
        let password_hash = {
            let password = password.to_string();
            tokio::task::spawn_blocking(move || hash_password(&password))
                .await
                .map_err(|e| AccountError::Storage(format!("Task join error: {}", e)))?
        };

        let row = user.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, password_hash, openrouter_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id.to_string(),
                    &row.email,
                    &row.name,
                    &password_hash,
                    &sealed,
                    chrono::Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await?;

        tracing::info!(user = %user.id, "Account created");
        Ok(user)
    }

    /// The user whose credentials match, or `None`.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>, AccountError> {
        let email = normalize_email(email);
        let password = password.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT id, email, name, password_hash FROM users WHERE email = ?1",
                    params![&email],
                    |row| {
                        Ok((
                            User {
                                id: uuid_column(row, 0)?,
                                email: row.get(1)?,
                                name: row.get(2)?,
                            },
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;
            Ok(found.and_then(|(user, hash)| verify_password(&password, &hash).then_some(user)))
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<User>, AccountError> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT email, name FROM users WHERE id = ?1",
                    params![id.to_string()],
                    |row| {
                        Ok(User {
                            id,
                            email: row.get(0)?,
                            name: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    /// The user's decrypted OpenRouter key, if one is stored.
    pub async fn openrouter_key(&self, id: Uuid) -> Result<Option<String>, AccountError> {
        let stored: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT openrouter_key FROM users WHERE id = ?1",
                        params![id.to_string()],
                        |row| row.get::<_, Option<String>>(0),
                    )
                    .optional()?
                    .flatten())
            })
            .await?;

        let key = match stored.filter(|k| !k.is_empty()) {
            Some(sealed) => self.unseal(&sealed)?,
            None => return Ok(None),
        };
        Ok(Some(key).filter(|k| !k.trim().is_empty()))
    }

    /// Replace the stored key. Returns false when the user does not exist.
    pub async fn set_openrouter_key(&self, id: Uuid, api_key: &str) -> Result<bool, AccountError> {
        let sealed = self.seal(api_key.trim())?;
        let updated = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "UPDATE users SET openrouter_key = ?1 WHERE id = ?2",
                    params![&sealed, id.to_string()],
                )?)
            })
            .await?;
        Ok(updated > 0)
    }
}
