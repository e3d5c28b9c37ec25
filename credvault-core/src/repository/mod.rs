//! Credential repository - encrypts around the remote table

mod guard;

use crate::{
    crypto::{decrypt, encrypt, CryptoError, KeyStore, UnlockKey},
    models::{
        Credential, CredentialPatch, CredentialRow, CredentialRowPatch, NewCredential,
        NewCredentialRow,
    },
    remote::CredentialTable,
    session::SessionProvider,
    Result, VaultError,
};
use chrono::Utc;
use guard::InFlight;
use std::sync::Arc;
use tokio::task::{spawn_blocking, JoinError};
use tracing::{debug, info, warn};

/// CRUD over the user's credentials with the password column sealed
/// under the active unlock key.
///
/// Every operation is scoped to the current session user. Operations that
/// touch a password need the key store to be unlocked. Sealing and opening
/// run on the blocking pool, since a key derivation can take a while.
pub struct CredentialRepository {
    table: Arc<dyn CredentialTable>,
    sessions: Arc<SessionProvider>,
    keys: KeyStore,
    in_flight: InFlight,
}

impl CredentialRepository {
    pub fn new(
        table: Arc<dyn CredentialTable>,
        sessions: Arc<SessionProvider>,
        keys: KeyStore,
    ) -> Self {
        Self {
            table,
            sessions,
            keys,
            in_flight: InFlight::default(),
        }
    }

    /// Snapshot of the active key; one operation uses one key throughout
    fn require_key(&self) -> Result<Arc<UnlockKey>> {
        self.keys.get_key().ok_or(VaultError::MasterPasswordRequired)
    }

    /// All of the user's credentials, newest first
    pub async fn list(&self) -> Result<Vec<Credential>> {
        let session = self.sessions.current_session()?;
        let key = self.require_key()?;

        debug!("Fetching credentials");
        let rows = self.table.select_by_owner(&session).await?;

        let owned: Vec<CredentialRow> = rows
            .into_iter()
            .filter(|row| {
                let mine = row.user_id == session.user_id();
                if !mine {
                    warn!(id = %row.id, "Dropping credential owned by another user");
                }
                mine
            })
            .collect();

        open_rows(owned, &key).await
    }

    /// One credential by id
    pub async fn get(&self, id: &str) -> Result<Credential> {
        let session = self.sessions.current_session()?;
        let key = self.require_key()?;
        let id = require_id(id)?;

        let row = self.table.select_one(&session, id).await?;
        if row.user_id != session.user_id() {
            return Err(VaultError::NotFound(format!("Credential {}", id)));
        }
        open_one(row, &key).await
    }

    /// Create a credential and return it with its plaintext password
    pub async fn create(&self, new: NewCredential) -> Result<Credential> {
        let session = self.sessions.current_session()?;
        let key = self.require_key()?;

        require_field("Platform", &new.platform)?;
        require_field("Username", &new.username)?;
        if new.password.is_empty() {
            return Err(VaultError::Validation("Password is required".to_string()));
        }

        let _permit = self.in_flight.acquire(format!(
            "new credential {}/{}",
            new.platform.trim().to_lowercase(),
            new.username.trim().to_lowercase()
        ))?;

        let sealed = seal(&new.password, &key).await?;
        let row = self
            .table
            .insert(
                &session,
                NewCredentialRow {
                    user_id: session.user_id().to_string(),
                    platform: new.platform.trim().to_string(),
                    username: new.username.trim().to_string(),
                    password: sealed,
                    email: non_blank(new.email),
                    notes: non_blank(new.notes),
                },
            )
            .await?;

        info!(id = %row.id, "Credential created");
        Ok(into_credential(row, new.password))
    }

    /// Apply `patch` and return the stored record.
    ///
    /// `updated_at` is refreshed even when the patch is empty.
    pub async fn update(&self, id: &str, patch: CredentialPatch) -> Result<Credential> {
        let session = self.sessions.current_session()?;
        let key = self.require_key()?;
        let id = require_id(id)?;

        if let Some(platform) = &patch.platform {
            require_field("Platform", platform)?;
        }
        if let Some(username) = &patch.username {
            require_field("Username", username)?;
        }
        if patch.password.as_deref() == Some("") {
            return Err(VaultError::Validation("Password is required".to_string()));
        }

        let _permit = self.in_flight.acquire(format!("credential {}", id))?;

        let password = match patch.password.as_deref() {
            Some(plaintext) => Some(seal(plaintext, &key).await?),
            None => None,
        };

        let row_patch = CredentialRowPatch {
            platform: patch.platform.map(|p| p.trim().to_string()),
            username: patch.username.map(|u| u.trim().to_string()),
            password,
            email: patch.email.map(|e| non_blank(Some(e))),
            notes: patch.notes.map(|n| non_blank(Some(n))),
            updated_at: Utc::now(),
        };

        let row = self.table.update(&session, id, row_patch).await?;
        info!(id = %row.id, "Credential updated");
        open_one(row, &key).await
    }

    /// Delete by id. Needs a session but no unlock key.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let session = self.sessions.current_session()?;
        let id = require_id(id)?;

        let _permit = self.in_flight.acquire(format!("credential {}", id))?;

        self.table.delete(&session, id).await?;
        info!(id, "Credential deleted");
        Ok(())
    }
}

fn join_err(e: JoinError) -> CryptoError {
    CryptoError::DecryptionFailed(format!("Crypto task failed: {}", e))
}

async fn seal(plaintext: &str, key: &Arc<UnlockKey>) -> Result<String> {
    let key = Arc::clone(key);
    let plaintext = plaintext.to_owned();
    let sealed = spawn_blocking(move || encrypt(&plaintext, &key))
        .await
        .map_err(|e| CryptoError::EncryptionFailed(format!("Crypto task failed: {}", e)))??;
    Ok(sealed)
}

async fn open_one(row: CredentialRow, key: &Arc<UnlockKey>) -> Result<Credential> {
    let key = Arc::clone(key);
    spawn_blocking(move || open_row(row, &key))
        .await
        .map_err(join_err)?
}

/// Opens all rows in one blocking task; rows sharing a salt share one derivation
async fn open_rows(rows: Vec<CredentialRow>, key: &Arc<UnlockKey>) -> Result<Vec<Credential>> {
    let key = Arc::clone(key);
    spawn_blocking(move || {
        rows.into_iter()
            .map(|row| open_row(row, &key))
            .collect::<Result<Vec<_>>>()
    })
    .await
    .map_err(join_err)?
}

fn open_row(row: CredentialRow, key: &UnlockKey) -> Result<Credential> {
    let password = decrypt(&row.password, key).map_err(|e| {
        warn!(id = %row.id, "Failed to decrypt credential: {}", e);
        e
    })?;
    Ok(into_credential(row, password))
}

fn into_credential(row: CredentialRow, password: String) -> Credential {
    Credential {
        id: row.id,
        user_id: row.user_id,
        platform: row.platform,
        username: row.username,
        password,
        email: row.email,
        notes: row.notes,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn require_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(VaultError::Validation("Credential id is required".to_string()));
    }
    Ok(id)
}

fn require_field(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(VaultError::Validation(format!("{} is required", name)));
    }
    Ok(())
}

/// Blank optional inputs are stored as absent
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
