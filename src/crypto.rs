//! At-rest encryption for stored API keys.
//!
//! AES-256-GCM with a process-wide key. Stored values look like
//! `enc:v1:BASE64(nonce || ciphertext)`; anything without that prefix is
//! treated as a legacy plaintext value and returned unchanged on decrypt.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use std::path::Path;

/// Key length in bytes (256 bits for AES-256)
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

const ENCRYPTED_PREFIX: &str = "enc:v1:";

pub type PrivateKey = [u8; KEY_LENGTH];

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

pub fn encrypt_value(key: &PrivateKey, plaintext: &str) -> Result<String> {
    if is_encrypted(plaintext) {
        return Ok(plaintext.to_string());
    }

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(&combined)))
}

pub fn decrypt_value(key: &PrivateKey, value: &str) -> Result<String> {
    let Some(payload) = value.strip_prefix(ENCRYPTED_PREFIX) else {
        return Ok(value.to_string());
    };

    let combined = BASE64
        .decode(payload)
        .context("Failed to decode encrypted value")?;
    if combined.len() < NONCE_LENGTH {
        return Err(anyhow!("Encrypted value too short"));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| anyhow!("Decryption failed: invalid key or corrupted data"))?;

    String::from_utf8(plaintext).context("Decrypted value is not valid UTF-8")
}

/// Parse a key from hex or base64 format.
pub fn parse_key(key_str: &str) -> Result<PrivateKey> {
    let trimmed = key_str.trim();

    if trimmed.len() == KEY_LENGTH * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(trimmed).context("Invalid hex key")?;
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let bytes = BASE64
        .decode(trimmed)
        .context("Key is neither valid hex nor base64")?;
    if bytes.len() != KEY_LENGTH {
        return Err(anyhow!(
            "Key must be {} bytes, got {} bytes",
            KEY_LENGTH,
            bytes.len()
        ));
    }

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&bytes);
    Ok(key)
}

pub fn generate_private_key() -> PrivateKey {
    let mut key = [0u8; KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Resolve the encryption key: the configured value if any, else the hex key
/// stored in `key_file`, else a fresh key written to `key_file`.
pub async fn load_or_create_private_key(
    configured: Option<&str>,
    key_file: &Path,
) -> Result<PrivateKey> {
    if let Some(value) = configured.filter(|v| !v.trim().is_empty()) {
        return parse_key(value).context("Invalid PRIVATE_KEY format");
    }

    if tokio::fs::try_exists(key_file).await.unwrap_or(false) {
        let stored = tokio::fs::read_to_string(key_file)
            .await
            .with_context(|| format!("Failed to read {}", key_file.display()))?;
        return parse_key(&stored)
            .with_context(|| format!("Invalid key in {}", key_file.display()));
    }

    if let Some(parent) = key_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create key directory")?;
    }
    let key = generate_private_key();
    tokio::fs::write(key_file, hex::encode(key))
        .await
        .context("Failed to write private key file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(key_file, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to restrict private key permissions")?;
    }

    tracing::info!("Generated new private key at {}", key_file.display());
    Ok(key)
}
