//! Key/value settings store on top of the local database.

use crate::database::Database;
use crate::{DatabaseError, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Key of the persisted master passphrase verifier
pub const MASTER_PASSWORD_HASH_KEY: &str = "master_password_hash";

/// Key of the persisted sign-in session
pub const AUTH_SESSION_KEY: &str = "auth_session";

/// Hex-encoded Argon2 salt new values on this device are sealed under
pub const KDF_SALT_KEY: &str = "kdf_salt";

/// Durable, device-scoped string settings. Cheap to clone.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    /// Open the store at `path`, creating parent directories as needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::from_database(Database::open(path)?))
    }

    /// Store backed by an in-memory database
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("Failed to lock local store".to_string()).into())
    }

    /// Read a value
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db()?;
        let value = db
            .conn()
            .query_row(
                "SELECT value FROM local_settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(value)
    }

    /// Insert or replace a value
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db()?;
        db.conn()
            .execute(
                "INSERT INTO local_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                (key, value, Utc::now().timestamp()),
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    /// Insert a value only if the key is absent. Returns whether it was written.
    pub fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let db = self.db()?;
        let inserted = db
            .conn()
            .execute(
                "INSERT OR IGNORE INTO local_settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                (key, value, Utc::now().timestamp()),
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(inserted == 1)
    }

    /// Delete a value. Missing keys are not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        let db = self.db()?;
        db.conn()
            .execute("DELETE FROM local_settings WHERE key = ?1", [key])
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }
}
