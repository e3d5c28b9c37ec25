//! AES-256-GCM sealing of password fields.
//!
//! A sealed secret is the text stored in the remote `password` column:
//! base64 of a bincode envelope holding the KDF parameters, a 96-bit nonce,
//! the ciphertext and the 128-bit authentication tag. Opening it with the
//! wrong key fails with [`CryptoError::AuthenticationFailed`] instead of
//! yielding unreadable text.

use crate::crypto::{keystore::UnlockKey, kdf::KdfParams, CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use bincode::Options;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Envelope format version written by this build
pub const SEALED_SECRET_VERSION: u8 = 1;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Cap on decoded envelope size; password fields are short.
const MAX_ENVELOPE_LEN: u64 = 64 * 1024;

/// A symmetric key derived from the master passphrase
pub struct DataEncryptionKey {
    key: [u8; 32],
}

impl DataEncryptionKey {
    /// Create a key from raw bytes
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for DataEncryptionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for DataEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// An encrypted value together with everything needed to open it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub version: u8,

    /// KDF parameters (including salt) the key was derived with
    pub kdf: KdfParams,

    /// Unique nonce for this value
    pub nonce: [u8; NONCE_LEN],

    /// Encrypted data without the tag
    pub ciphertext: Vec<u8>,

    /// Authentication tag
    pub auth_tag: [u8; TAG_LEN],
}

fn envelope_codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_ENVELOPE_LEN)
}

impl SealedSecret {
    /// Encrypt `plaintext` under `dek`, recording the parameters `dek` came from
    pub fn seal(dek: &DataEncryptionKey, kdf: &KdfParams, plaintext: &[u8]) -> Result<Self> {
        if plaintext.is_empty() {
            return Err(CryptoError::EncryptionFailed(
                "Cannot encrypt empty data".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new(dek.as_bytes().into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let nonce_bytes: [u8; NONCE_LEN] = nonce.into();

        let mut ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

        // aes-gcm appends the tag to the ciphertext
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::EncryptionFailed(
                "Ciphertext too short - missing auth tag".to_string(),
            ));
        }
        let tag_start = ciphertext.len() - TAG_LEN;
        let auth_tag: [u8; TAG_LEN] = ciphertext[tag_start..]
            .try_into()
            .map_err(|_| CryptoError::EncryptionFailed("Invalid auth tag length".to_string()))?;
        ciphertext.truncate(tag_start);

        Ok(Self {
            version: SEALED_SECRET_VERSION,
            kdf: kdf.clone(),
            nonce: nonce_bytes,
            ciphertext,
            auth_tag,
        })
    }

    /// Decrypt and authenticate with `dek`
    pub fn open(&self, dek: &DataEncryptionKey) -> Result<Vec<u8>> {
        if self.ciphertext.is_empty() {
            return Err(CryptoError::DecryptionFailed(
                "Cannot decrypt empty data".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new(dek.as_bytes().into());
        let nonce = Nonce::from(self.nonce);

        let mut ciphertext_with_tag = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        ciphertext_with_tag.extend_from_slice(&self.ciphertext);
        ciphertext_with_tag.extend_from_slice(&self.auth_tag);

        cipher
            .decrypt(&nonce, ciphertext_with_tag.as_slice())
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Serialize to the text form stored remotely
    pub fn encode(&self) -> Result<String> {
        let bytes = envelope_codec()
            .serialize(self)
            .map_err(|e| CryptoError::EncryptionFailed(format!("Encoding failed: {}", e)))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Parse the text form. Anything not produced by [`SealedSecret::encode`]
    /// is rejected with [`CryptoError::InvalidFormat`].
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidFormat(format!("not base64: {}", e)))?;

        let secret: Self = envelope_codec()
            .deserialize(&bytes)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;

        if secret.version != SEALED_SECRET_VERSION {
            return Err(CryptoError::InvalidFormat(format!(
                "unsupported version {}",
                secret.version
            )));
        }

        Ok(secret)
    }
}

/// Encrypt a password field under the unlock key's session salt
pub fn encrypt(plaintext: &str, key: &UnlockKey) -> Result<String> {
    let kdf = key.session_params();
    let dek = key.derived_key(kdf)?;
    SealedSecret::seal(&dek, kdf, plaintext.as_bytes())?.encode()
}

/// Decrypt a password field produced by [`encrypt`]
pub fn decrypt(sealed: &str, key: &UnlockKey) -> Result<String> {
    let secret = SealedSecret::decode(sealed)?;
    let dek = key.derived_key(&secret.kdf)?;
    let bytes = secret.open(&dek)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::DecryptionFailed("Invalid UTF-8".to_string()))
}
