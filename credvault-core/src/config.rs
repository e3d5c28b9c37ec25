//! Vault configuration.

use crate::crypto::kdf::{DEFAULT_MEM_COST, DEFAULT_PARALLELISM, DEFAULT_TIME_COST};
use crate::crypto::KdfParams;
use crate::platform::{get_default_config_path, get_default_store_path};
use crate::unlock::DEFAULT_MIN_PASSPHRASE_LEN;
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Argon2id costs for new encryptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfSettings {
    /// Memory cost in KiB
    pub mem_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            mem_cost: DEFAULT_MEM_COST,
            time_cost: DEFAULT_TIME_COST,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl KdfSettings {
    /// Parameter template with a fresh salt
    pub fn to_params(&self) -> KdfParams {
        KdfParams::with_costs(self.mem_cost, self.time_cost, self.parallelism)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Base URL of the hosted backend, e.g. `https://xyz.supabase.co`
    pub backend_url: String,
    /// Public (anon) API key of the backend project
    pub anon_key: String,
    pub local_store_path: PathBuf,
    pub min_master_password_len: usize,
    pub request_timeout_secs: u64,
    pub kdf: KdfSettings,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            anon_key: String::new(),
            local_store_path: get_default_store_path(),
            min_master_password_len: DEFAULT_MIN_PASSPHRASE_LEN,
            request_timeout_secs: 30,
            kdf: KdfSettings::default(),
        }
    }
}

impl VaultConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default config file if it exists,
    /// else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = get_default_config_path();
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf
            .to_params()
            .validate()
            .map_err(|e| VaultError::Config(format!("kdf: {}", e)))?;
        if self.request_timeout_secs == 0 {
            return Err(VaultError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
