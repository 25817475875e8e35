//! PBKDF2-HMAC-SHA256 password hashes in the form
//! `pbkdf2:iterations:hex_salt:hex_hash`.

use rand::RngCore;
use sha2::Sha256;

#[cfg(not(test))]
const ITERATIONS: u32 = 100_000;
// Keep test suites fast; the format records the count so hashes stay valid.
#[cfg(test)]
const ITERATIONS: u32 = 1_000;
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;

pub fn hash_password(password: &str) -> String {
    hash_with_iterations(password, ITERATIONS)
}

fn hash_with_iterations(password: &str, iterations: u32) -> String {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut hash = [0u8; HASH_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut hash);
    format!(
        "pbkdf2:{}:{}:{}",
        iterations,
        hex::encode(salt),
        hex::encode(hash)
    )
}

/// Check `password` against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split(':');
    let (Some("pbkdf2"), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let (Ok(iterations), Ok(salt), Ok(expected)) = (
        iterations.parse::<u32>(),
        hex::decode(salt),
        hex::decode(expected),
    ) else {
        return false;
    };
    if iterations == 0 || expected.is_empty() {
        return false;
    }

    let mut actual = vec![0u8; expected.len()];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut actual);
    constant_time_eq(&actual, &expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
