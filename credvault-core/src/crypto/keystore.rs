//! Unlock key and the key store that holds it.
//!
//! Master Passphrase → Argon2id(salt) → Data Encryption Key
//!
//! The key store is an explicit handle: whoever needs the key is given a
//! clone of the [`KeyStore`], there is no process-wide slot. Clones share
//! the same slot, so clearing through one handle locks every holder.

use crate::crypto::{
    cipher::DataEncryptionKey,
    kdf::{derive_key, KdfParams, DEFAULT_MEM_COST, DEFAULT_PARALLELISM, DEFAULT_TIME_COST, SALT_LEN},
    CryptoError, Result,
};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

/// Derived keys kept per unlock key before the cache is reset
const MAX_CACHED_KEYS: usize = 16;

/// The active master passphrase for this session
///
/// Keys derived from it are cached per KDF parameter set so that a list of
/// values sealed under the same salt costs one Argon2 run, not one per row.
/// Derivation is CPU and memory heavy; async callers run it on the blocking
/// pool.
pub struct UnlockKey {
    passphrase: SecretString,
    session: KdfParams,
    derived: Mutex<HashMap<KdfParams, Arc<DataEncryptionKey>>>,
}

impl UnlockKey {
    /// Wrap a passphrase; `session` supplies the salt used for new encryptions
    pub fn new(passphrase: &str, session: KdfParams) -> Self {
        Self {
            passphrase: SecretString::from(passphrase.to_owned()),
            session,
            derived: Mutex::new(HashMap::new()),
        }
    }

    /// Parameters new values are sealed under
    pub fn session_params(&self) -> &KdfParams {
        &self.session
    }

    /// Whether a stored value's parameters may be derived with this key.
    ///
    /// Costs above both the session costs and the defaults are refused, so
    /// a row written by someone else cannot make a read arbitrarily slow.
    pub fn accepts(&self, params: &KdfParams) -> bool {
        let ceiling = KdfParams {
            salt: self.session.salt,
            mem_cost: self.session.mem_cost.max(DEFAULT_MEM_COST),
            time_cost: self.session.time_cost.max(DEFAULT_TIME_COST),
            parallelism: self.session.parallelism.max(DEFAULT_PARALLELISM),
        };
        params.within(&ceiling)
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<KdfParams, Arc<DataEncryptionKey>>> {
        match self.derived.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Key for `params`, deriving it on first use
    pub fn derived_key(&self, params: &KdfParams) -> Result<Arc<DataEncryptionKey>> {
        if !self.accepts(params) {
            return Err(CryptoError::InvalidFormat(format!(
                "KDF costs above local limit (mem {} KiB, t={}, p={})",
                params.mem_cost, params.time_cost, params.parallelism
            )));
        }

        if let Some(key) = self.cache().get(params) {
            return Ok(Arc::clone(key));
        }

        debug!(
            mem_cost = params.mem_cost,
            time_cost = params.time_cost,
            "Deriving data encryption key"
        );
        let key = Arc::new(derive_key(
            self.passphrase.expose_secret().as_bytes(),
            params,
        )?);

        let mut cache = self.cache();
        if cache.len() >= MAX_CACHED_KEYS && !cache.contains_key(params) {
            cache.clear();
        }
        Ok(Arc::clone(cache.entry(params.clone()).or_insert(key)))
    }
}

impl std::fmt::Debug for UnlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockKey")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Holder of the current unlock key. Never persisted.
#[derive(Clone)]
pub struct KeyStore {
    slot: Arc<RwLock<Option<Arc<UnlockKey>>>>,
    template: KdfParams,
}

impl KeyStore {
    /// Create an empty key store with default Argon2id costs
    pub fn new() -> Self {
        Self::with_kdf(KdfParams::default())
    }

    /// Create an empty key store deriving keys with the costs of `template`
    pub fn with_kdf(template: KdfParams) -> Self {
        if !template.is_hardened() {
            warn!(
                mem_cost = template.mem_cost,
                "Argon2 memory cost below recommended minimum"
            );
        }

        Self {
            slot: Arc::new(RwLock::new(None)),
            template,
        }
    }

    /// Install `passphrase` as the active key under a fresh salt, replacing
    /// any previous one
    pub fn set_key(&self, passphrase: &str) {
        self.install(UnlockKey::new(passphrase, self.template.resalted()));
    }

    /// Install `passphrase` as the active key, sealing new values under
    /// `salt`. Values sealed across unlocks with the same salt share one
    /// derived key.
    pub fn set_key_with_salt(&self, passphrase: &str, salt: [u8; SALT_LEN]) {
        let mut session = self.template.clone();
        session.salt = salt;
        self.install(UnlockKey::new(passphrase, session));
    }

    fn install(&self, key: UnlockKey) {
        let key = Arc::new(key);
        match self.slot.write() {
            Ok(mut slot) => *slot = Some(key),
            Err(poisoned) => *poisoned.into_inner() = Some(key),
        }
    }

    /// The active key, if any
    pub fn get_key(&self) -> Option<Arc<UnlockKey>> {
        match self.slot.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remove the active key
    pub fn clear_key(&self) {
        match self.slot.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn is_set(&self) -> bool {
        self.get_key().is_some()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("is_set", &self.is_set())
            .finish()
    }
}
