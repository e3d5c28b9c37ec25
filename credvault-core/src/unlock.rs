//! Master passphrase gate in front of the key store.
//!
//! The first successful unlock on a device establishes the verifier (a
//! SHA-256 digest of the passphrase kept in the local store); every later
//! unlock must match it. There is no lockout: a failed attempt can be
//! retried immediately.
//!
//! The Argon2 salt is device-scoped too, so every unlock seals new values
//! under the same derived key and a list costs one derivation.

use crate::crypto::kdf::SALT_LEN;
use crate::crypto::{hash_passphrase, verify_passphrase, KeyStore};
use crate::database::{LocalStore, KDF_SALT_KEY, MASTER_PASSWORD_HASH_KEY};
use crate::{DatabaseError, Result, VaultError};
use tracing::{info, warn};

/// Minimum master passphrase length, in characters
pub const DEFAULT_MIN_PASSPHRASE_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

pub struct UnlockFlow {
    store: LocalStore,
    keys: KeyStore,
    min_len: usize,
}

impl UnlockFlow {
    pub fn new(store: LocalStore, keys: KeyStore) -> Self {
        Self {
            store,
            keys,
            min_len: DEFAULT_MIN_PASSPHRASE_LEN,
        }
    }

    /// Override the minimum passphrase length
    pub fn with_min_len(mut self, min_len: usize) -> Self {
        self.min_len = min_len;
        self
    }

    pub fn state(&self) -> LockState {
        if self.keys.is_set() {
            LockState::Unlocked
        } else {
            LockState::Locked
        }
    }

    /// Whether a verifier exists, i.e. this is not first-time setup
    pub fn has_verifier(&self) -> Result<bool> {
        Ok(self.store.get(MASTER_PASSWORD_HASH_KEY)?.is_some())
    }

    /// Verify or establish `passphrase` and install it in the key store
    pub fn unlock(&self, passphrase: &str) -> Result<()> {
        if passphrase.chars().count() < self.min_len {
            return Err(VaultError::Validation(format!(
                "Master password must be at least {} characters",
                self.min_len
            )));
        }

        let stored = match self.store.get(MASTER_PASSWORD_HASH_KEY)? {
            Some(stored) => stored,
            None => {
                let digest = hash_passphrase(passphrase);
                if self.store.set_if_absent(MASTER_PASSWORD_HASH_KEY, &digest)? {
                    info!("Master password established");
                    self.keys.set_key_with_salt(passphrase, self.device_salt()?);
                    return Ok(());
                }
                // Another process established it first
                self.store
                    .get(MASTER_PASSWORD_HASH_KEY)?
                    .ok_or(VaultError::IncorrectMasterPassword)?
            }
        };

        if !verify_passphrase(passphrase, &stored) {
            warn!("Master password rejected");
            return Err(VaultError::IncorrectMasterPassword);
        }

        self.keys.set_key_with_salt(passphrase, self.device_salt()?);
        info!("Vault unlocked");
        Ok(())
    }

    /// The persisted KDF salt, created on first use
    fn device_salt(&self) -> Result<[u8; SALT_LEN]> {
        if let Some(stored) = self.store.get(KDF_SALT_KEY)? {
            if let Some(salt) = decode_salt(&stored) {
                return Ok(salt);
            }
            // Sealed values carry their own salt, so replacing it loses nothing
            warn!("Replacing unreadable KDF salt");
            let salt: [u8; SALT_LEN] = rand::random();
            self.store.set(KDF_SALT_KEY, &hex::encode(salt))?;
            return Ok(salt);
        }

        let salt: [u8; SALT_LEN] = rand::random();
        if self.store.set_if_absent(KDF_SALT_KEY, &hex::encode(salt))? {
            return Ok(salt);
        }
        self.store
            .get(KDF_SALT_KEY)?
            .as_deref()
            .and_then(decode_salt)
            .ok_or_else(|| DatabaseError::Serialization("Unreadable KDF salt".to_string()).into())
    }

    /// Drop the unlock key
    pub fn lock(&self) {
        self.keys.clear_key();
        info!("Vault locked");
    }
}

fn decode_salt(stored: &str) -> Option<[u8; SALT_LEN]> {
    hex::decode(stored.trim()).ok()?.try_into().ok()
}
