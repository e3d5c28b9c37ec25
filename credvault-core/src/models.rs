//! Credential records and identity types.
//!
//! `Credential` is the client-side shape with a plaintext password.
//! `CredentialRow` is the remote table's shape with a sealed password; only
//! the repository converts between the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored credential with its password decrypted
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub platform: String,
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("platform", &self.platform)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("email", &self.email)
            .field("notes", &self.notes)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Credential {
    /// Case-insensitive match on platform, username or email
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }

        self.platform.to_lowercase().contains(&term)
            || self.username.to_lowercase().contains(&term)
            || self
                .email
                .as_deref()
                .is_some_and(|email| email.to_lowercase().contains(&term))
    }
}

/// A row of the remote `credentials` table. `password` is a sealed secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRow {
    pub id: String,
    pub user_id: String,
    pub platform: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a credential
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCredential {
    pub platform: String,
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub notes: Option<String>,
}

impl std::fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewCredential")
            .field("platform", &self.platform)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("email", &self.email)
            .field("notes", &self.notes)
            .finish()
    }
}

/// Partial update of a credential. `None` leaves a field unchanged.
///
/// For `email` and `notes`, `Some("")` clears the stored value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPatch {
    pub platform: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

impl std::fmt::Debug for CredentialPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPatch")
            .field("platform", &self.platform)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("email", &self.email)
            .field("notes", &self.notes)
            .finish()
    }
}

impl CredentialPatch {
    pub fn is_empty(&self) -> bool {
        self.platform.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.email.is_none()
            && self.notes.is_none()
    }
}

/// Row sent to the remote table on insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCredentialRow {
    pub user_id: String,
    pub platform: String,
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Column changes sent to the remote table on update.
///
/// The outer `Option` of `email`/`notes` means "touch this column"; the
/// inner one is the new value, `None` serializing to SQL `NULL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRowPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    pub updated_at: DateTime<Utc>,
}

/// An authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An identity plus the bearer token that proves it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp after which the access token is rejected
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now.timestamp() >= at)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
