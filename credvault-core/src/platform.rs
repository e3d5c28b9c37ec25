//! Where credvault keeps its files.
//!
//! The local store lives under the per-user data directory and the config
//! file under the per-user config directory, both in a `credvault`
//! subdirectory. Without a home directory everything falls back to the
//! working directory.

use std::path::PathBuf;

const APP_DIR: &str = "credvault";

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// Directory holding the local store
pub fn get_data_dir() -> PathBuf {
    app_dir(dirs::data_local_dir())
}

/// Directory searched for `config.toml`
pub fn get_config_dir() -> PathBuf {
    app_dir(dirs::config_dir())
}

pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Local store holding the verifier, the KDF salt and the persisted session
pub fn get_default_store_path() -> PathBuf {
    get_data_dir().join("local.db")
}
