//! Argon2id key derivation from the master passphrase.
//!
//! The symmetric key used for password fields is never the raw passphrase:
//! it is derived with Argon2id over a random 16-byte salt. Defaults:
//! - Memory cost: 64 MiB (65,536 KiB)
//! - Time cost: 3 iterations
//! - Parallelism: 4 lanes
//! - Output length: 32 bytes (256 bits)

use crate::crypto::{cipher::DataEncryptionKey, CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes
pub const KEY_LEN: usize = 32;

pub const DEFAULT_MEM_COST: u32 = 65_536;
pub const DEFAULT_TIME_COST: u32 = 3;
pub const DEFAULT_PARALLELISM: u32 = 4;

/// OWASP floor for Argon2id memory cost (19 MiB)
pub const RECOMMENDED_MIN_MEM_COST: u32 = 19_456;

/// Absolute upper bounds on Argon2 costs (1 GiB, 16 passes, 16 lanes)
const MAX_MEM_COST: u32 = 1024 * 1024;
const MAX_TIME_COST: u32 = 16;
const MAX_PARALLELISM: u32 = 16;

/// Parameters for Argon2id key derivation
///
/// The parameters travel with every sealed secret, so a value written
/// under one salt can still be opened after the session salt changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KdfParams {
    /// Salt for key derivation (16 bytes)
    pub salt: [u8; SALT_LEN],

    /// Memory cost in KiB
    pub mem_cost: u32,

    /// Time cost (number of iterations)
    pub time_cost: u32,

    /// Parallelism (number of lanes)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::with_costs(DEFAULT_MEM_COST, DEFAULT_TIME_COST, DEFAULT_PARALLELISM)
    }
}

impl KdfParams {
    /// Create new parameters with default costs and a random salt
    pub fn new() -> Self {
        Self::default()
    }

    /// Create parameters with explicit costs and a fresh random salt
    pub fn with_costs(mem_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            salt: rand::random(),
            mem_cost,
            time_cost,
            parallelism,
        }
    }

    /// Minimal parameters for tests. Offers no real brute-force resistance.
    pub fn fast_insecure() -> Self {
        Self::with_costs(64, 1, 1)
    }

    /// Same costs, new random salt
    pub fn resalted(&self) -> Self {
        Self::with_costs(self.mem_cost, self.time_cost, self.parallelism)
    }

    /// Check the parameters against Argon2's structural limits.
    ///
    /// Values read back from the remote store are untrusted, so the upper
    /// bounds matter as much as the lower ones.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism < 1 || self.parallelism > MAX_PARALLELISM {
            return Err(CryptoError::KdfFailed(format!(
                "Parallelism out of range: {}",
                self.parallelism
            )));
        }
        if self.time_cost < 1 || self.time_cost > MAX_TIME_COST {
            return Err(CryptoError::KdfFailed(format!(
                "Time cost out of range: {}",
                self.time_cost
            )));
        }
        if self.mem_cost < 8 * self.parallelism {
            return Err(CryptoError::KdfFailed(format!(
                "Memory cost too low (minimum: {} KiB)",
                8 * self.parallelism
            )));
        }
        if self.mem_cost > MAX_MEM_COST {
            return Err(CryptoError::KdfFailed(format!(
                "Memory cost too high: {} KiB",
                self.mem_cost
            )));
        }
        Ok(())
    }

    /// Whether the memory cost reaches the recommended floor
    pub fn is_hardened(&self) -> bool {
        self.mem_cost >= RECOMMENDED_MIN_MEM_COST
    }

    /// Whether every cost is at most the corresponding cost of `ceiling`
    pub fn within(&self, ceiling: &KdfParams) -> bool {
        self.mem_cost <= ceiling.mem_cost
            && self.time_cost <= ceiling.time_cost
            && self.parallelism <= ceiling.parallelism
    }
}

/// Derive the 256-bit data encryption key from a passphrase using Argon2id
pub fn derive_key(passphrase: &[u8], params: &KdfParams) -> Result<DataEncryptionKey> {
    params.validate()?;

    let params_obj = Params::new(
        params.mem_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params_obj);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase, &params.salt, &mut key)
        .map_err(|e| CryptoError::KdfFailed(format!("Hashing failed: {}", e)))?;

    let dek = DataEncryptionKey::from_bytes(key);
    key.zeroize();

    Ok(dek)
}
