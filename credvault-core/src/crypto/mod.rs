//! Cryptographic primitives for the credential vault.
//!
//! This module provides:
//! - Argon2id derivation of the symmetric key from the master passphrase
//! - AES-256-GCM sealing of password fields
//! - SHA-256 verifier for master passphrase checks
//! - The in-memory key store holding the unlock key

pub mod cipher;
pub mod kdf;
pub mod keystore;
pub mod verifier;

pub use cipher::{decrypt, encrypt, DataEncryptionKey, SealedSecret, SEALED_SECRET_VERSION};
pub use kdf::{derive_key, KdfParams};
pub use keystore::{KeyStore, UnlockKey};
pub use verifier::{hash_passphrase, verify_passphrase};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Authentication failed - wrong key or tampered data")]
    AuthenticationFailed,

    #[error("Invalid sealed secret: {0}")]
    InvalidFormat(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
