//! Credential rotation
//!
//! A successful account task replaces its secret with a fresh random value.
//! Rotation only mutates the in-memory record; the caller persists the whole
//! store afterwards.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use common::Secret;
use rand::RngExt;
use tracing::debug;

use crate::credentials::CredentialRecord;

/// Random bytes behind each generated secret.
pub const SECRET_ENTROPY_BYTES: usize = 16;

/// Generate a cryptographically random, URL-safe secret.
///
/// 16 random bytes encoded as URL-safe base64 without padding (22 chars).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_ENTROPY_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Replace the record's secret with a fresh one and stamp `last_rotated_at`.
///
/// Returns the new secret. Does not persist.
pub fn rotate(record: &mut CredentialRecord) -> Secret<String> {
    let secret = Secret::new(generate_secret());
    record.set_secret(secret.clone(), Utc::now());
    debug!(account_id = record.identifier(), "credential rotated");
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_is_url_safe() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 22);
        assert!(
            secret
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "secret must be URL-safe, got: {secret}"
        );
    }

    #[test]
    fn generated_secrets_are_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b, "two secrets should never collide");
    }

    #[test]
    fn rotate_replaces_secret_and_stamps_time() {
        let mut record = CredentialRecord::new("acct-1", "original");
        let before = Utc::now();

        let new_secret = rotate(&mut record);

        assert_ne!(record.secret().expose(), "original");
        assert_eq!(record.secret(), &new_secret);
        let rotated_at = record.last_rotated_at().unwrap();
        assert!(rotated_at >= before);
    }

    #[test]
    fn rotate_twice_changes_secret_each_time() {
        let mut record = CredentialRecord::new("acct-1", "original");
        let first = rotate(&mut record);
        let second = rotate(&mut record);
        assert_ne!(first, second);
    }
}
