//! Argon2id password hashing for the primary login credential.
//!
//! Hashes are stored as PHC strings in `users.password_hash`. When the user is
//! unknown the password is still checked against a throwaway hash so both
//! paths cost the same.

use anyhow::{anyhow, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use tracing::error;

static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| match hash_password("helpdesk-dummy") {
    Ok(hash) => Some(hash),
    Err(err) => {
        error!("Failed to build dummy password hash: {err}");
        None
    }
});

/// Hash a password into a PHC string with a random salt.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

/// Check a password against a stored PHC string. Malformed hashes never verify.
pub(super) fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        error!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Burn the same work as a real check when there is no hash to compare with.
pub(super) fn verify_dummy(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}
