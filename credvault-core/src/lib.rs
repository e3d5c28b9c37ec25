//! Credential Vault Core Library
//!
//! Client-side encryption gate for a remote credential table: a master
//! passphrase unlocks a per-session key, and the credential repository
//! encrypts the password field on every write and decrypts it on every read.

pub mod config;
pub mod crypto;
pub mod database;
pub mod list;
pub mod models;
pub mod platform;
pub mod remote;
pub mod repository;
pub mod session;
pub mod unlock;

pub use config::{KdfSettings, VaultConfig};
pub use crypto::{
    decrypt, encrypt, hash_passphrase, CryptoError, KdfParams, KeyStore, SealedSecret, UnlockKey,
};
pub use database::{
    Database, LocalStore, AUTH_SESSION_KEY, KDF_SALT_KEY, MASTER_PASSWORD_HASH_KEY,
};
pub use list::CredentialList;
pub use models::{Credential, CredentialPatch, NewCredential, Session, User};
pub use platform::{get_config_dir, get_data_dir, get_default_config_path, get_default_store_path};
pub use remote::{
    memory::{MemoryIdentity, MemoryTable},
    rest::{RestClient, RestIdentity, RestTable},
    CredentialTable, IdentityProvider, SignUpResponse,
};
pub use repository::CredentialRepository;
pub use session::{SessionProvider, SignUpOutcome};
pub use unlock::{LockState, UnlockFlow, DEFAULT_MIN_PASSPHRASE_LEN};

use thiserror::Error;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// General error type for vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Master password required")]
    MasterPasswordRequired,

    #[error("Incorrect master password")]
    IncorrectMasterPassword,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Remote service error: {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation already in progress: {0}")]
    OperationInProgress(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Build a remote error for a transport-level failure (no HTTP status)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Remote {
            status: None,
            message: message.into(),
        }
    }
}

/// Errors raised by the local SQLite store
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    #[error("Schema metadata missing")]
    MissingSchemaMetadata,
}
