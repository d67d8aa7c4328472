//! Password hashing and strength rules.
//!
//! Argon2id with per-password salts. Stored hashes are PHC strings, so
//! parameters can change without invalidating existing credentials.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use once_cell::sync::Lazy;

const MIN_PASSWORD_LENGTH: usize = 8;
const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Hash a password with a fresh random salt.
pub(super) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Verify a password against a stored PHC hash. Unparseable hashes verify
/// as false rather than erroring; the caller never learns why.
pub(super) fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| hash_password("custodia-timing-equalizer").unwrap_or_default());

/// Run a throwaway verification so lookups for unknown usernames cost about
/// the same as a real password check.
pub(super) fn equalize_timing() {
    let _ = verify_password("custodia-timing-equalizer-probe", &DUMMY_HASH);
}

/// Strength rules carried over from the ledger's registration policy.
/// Returns one message per unmet rule; empty means acceptable.
pub(super) fn validate_strength(password: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push("Password must be at least 8 characters long.".to_string());
    }
    if !password.chars().any(char::is_uppercase) {
        errors.push("Password must contain at least one uppercase letter.".to_string());
    }
    if !password.chars().any(char::is_lowercase) {
        errors.push("Password must contain at least one lowercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one digit.".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        errors.push("Password must contain at least one special character.".to_string());
    }
    errors
}
