//! External collaborators: the identity service and the remote credential table.
//!
//! Both are opaque to the vault. The REST implementations speak the hosted
//! backend's HTTP API; the in-memory ones serve tests and local development.

pub mod memory;
pub mod rest;

use crate::models::{CredentialRow, CredentialRowPatch, NewCredentialRow, Session, User};
use crate::Result;
use async_trait::async_trait;

/// Result of a sign-up call
#[derive(Debug, Clone)]
pub struct SignUpResponse {
    pub user: User,
    /// Absent when the account must be confirmed by email first
    pub session: Option<Session>,
}

/// Hosted identity service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_out(&self, session: &Session) -> Result<()>;
}

/// The remote `credentials` table.
///
/// Every call carries the session: its user id scopes the rows, its token
/// authorizes the request. Implementations must filter by owner even where
/// the backend's own access policy would already do so.
#[async_trait]
pub trait CredentialTable: Send + Sync {
    /// All rows owned by the session user, newest first
    async fn select_by_owner(&self, session: &Session) -> Result<Vec<CredentialRow>>;

    /// One row by id and owner
    async fn select_one(&self, session: &Session, id: &str) -> Result<CredentialRow>;

    /// Insert and return the stored row
    async fn insert(&self, session: &Session, row: NewCredentialRow) -> Result<CredentialRow>;

    /// Update by id and owner and return the stored row
    async fn update(
        &self,
        session: &Session,
        id: &str,
        patch: CredentialRowPatch,
    ) -> Result<CredentialRow>;

    /// Delete by id and owner
    async fn delete(&self, session: &Session, id: &str) -> Result<()>;
}
