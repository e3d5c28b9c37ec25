//! Master passphrase verifier.
//!
//! The verifier is a one-way SHA-256 digest of the passphrase, stored on the
//! device and used only to recognise the correct passphrase on later unlocks.
//! It is never used as, or to derive, the encryption key.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Lowercase hex SHA-256 of the passphrase
pub fn hash_passphrase(passphrase: &str) -> String {
    hex::encode(Sha256::digest(passphrase.as_bytes()))
}

/// Compare a passphrase against a stored verifier in constant time
pub fn verify_passphrase(passphrase: &str, stored: &str) -> bool {
    let candidate = hash_passphrase(passphrase);
    candidate.as_bytes().ct_eq(stored.trim().as_bytes()).into()
}
