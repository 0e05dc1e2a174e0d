//! Password digests.
//!
//! A stored `passwordHash` is the hex encoding of
//! `HMAC-SHA256(key = server secret, message = salt || password)`. Records
//! written by older tooling may carry a prefix before the digest, so only the
//! trailing [`DIGEST_LEN`] bytes are compared.

use super::{AuthRecord, PersistenceError};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Errors while computing or checking a digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid key")]
    InvalidKey,
    #[error("malformed password hash for '{user}': {reason}")]
    MalformedHash { user: String, reason: String },
}

impl From<AuthError> for PersistenceError {
    fn from(err: AuthError) -> Self {
        PersistenceError::Malformed(err.to_string())
    }
}

/// Computes the raw digest for a password.
pub fn digest(secret: &[u8], salt: &str, password: &str) -> Result<[u8; DIGEST_LEN], AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::InvalidKey)?;
    mac.update(salt.as_bytes());
    mac.update(password.as_bytes());
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Produces the hex string stored as `passwordHash`.
pub fn hash_password(secret: &[u8], salt: &str, password: &str) -> Result<String, AuthError> {
    digest(secret, salt, password).map(hex::encode)
}

/// Checks `password` against a stored record in constant time.
///
/// # Errors
///
/// [`AuthError::MalformedHash`] if the stored hash is not hex or is shorter
/// than a digest.
pub fn verify(secret: &[u8], record: &AuthRecord, password: &str) -> Result<bool, AuthError> {
    let malformed = |reason: String| AuthError::MalformedHash {
        user: record.user.clone(),
        reason,
    };
    let stored = hex::decode(record.password_hash.trim())
        .map_err(|e| malformed(format!("not hex: {e}")))?;
    if stored.len() < DIGEST_LEN {
        return Err(malformed(format!(
            "{} bytes, expected at least {DIGEST_LEN}",
            stored.len()
        )));
    }

    let expected = digest(secret, &record.salt, password)?;
    let suffix = &stored[stored.len() - DIGEST_LEN..];
    Ok(suffix.ct_eq(&expected).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: String) -> AuthRecord {
        AuthRecord {
            user: "bob".to_string(),
            password_hash: hash,
            salt: "pepper".to_string(),
        }
    }

    #[test]
    fn matching_password_verifies() {
        let rec = record(hash_password(b"k", "pepper", "hunter2").expect("hashes"));
        assert_eq!(verify(b"k", &rec, "hunter2"), Ok(true));
        assert_eq!(verify(b"k", &rec, "hunter3"), Ok(false));
        assert_eq!(verify(b"other", &rec, "hunter2"), Ok(false));
    }

    #[test]
    fn salt_changes_the_digest() {
        assert_ne!(digest(b"k", "a", "pw"), digest(b"k", "b", "pw"));
        assert!(digest(b"", "a", "pw").is_ok());
    }

    #[test]
    fn prefixed_hash_compares_trailing_digest() {
        let hash = hash_password(b"k", "pepper", "hunter2").expect("hashes");
        let rec = record(format!("00ff{hash}"));
        assert_eq!(verify(b"k", &rec, "hunter2"), Ok(true));
    }

    #[test]
    fn malformed_hashes_are_errors() {
        assert!(matches!(
            verify(b"k", &record("zz".to_string()), "pw"),
            Err(AuthError::MalformedHash { .. })
        ));
        let err = verify(b"k", &record("abcd".to_string()), "pw").expect_err("too short");
        assert!(matches!(PersistenceError::from(err), PersistenceError::Malformed(_)));
    }
}
