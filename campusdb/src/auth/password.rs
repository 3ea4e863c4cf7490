// Password hashing and verification

use crate::error::Result;
use bcrypt::{hash, verify};
use sha2::{Digest, Sha256};

/// Hashes new passwords with bcrypt and verifies both bcrypt hashes and the
/// unsalted SHA-256 hex digests written by earlier deployments.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        PasswordHasher { cost }
    }

    /// Bcrypt hash string (includes salt)
    pub fn hash(&self, password: &str) -> Result<String> {
        Ok(hash(password, self.cost)?)
    }

    /// Check a password against a stored hash. A malformed or empty stored
    /// hash never verifies.
    pub fn verify(&self, password: &str, stored: &str) -> Result<bool> {
        if stored.is_empty() {
            return Ok(false);
        }
        if is_legacy_hash(stored) {
            return Ok(legacy_sha256_hex(password).eq_ignore_ascii_case(stored));
        }
        match verify(password, stored) {
            Ok(ok) => Ok(ok),
            Err(_) => {
                log::warn!("Stored password hash is not in a recognised format");
                Ok(false)
            }
        }
    }

    /// Whether a stored hash should be replaced with a bcrypt one.
    pub fn needs_upgrade(&self, stored: &str) -> bool {
        is_legacy_hash(stored)
    }
}

/// 64 hex characters: an unsalted SHA-256 digest.
fn is_legacy_hash(stored: &str) -> bool {
    stored.len() == 64 && stored.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Lowercase hex SHA-256 of the password, the legacy storage format.
pub fn legacy_sha256_hex(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
