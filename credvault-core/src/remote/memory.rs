//! In-process identity service and credential table.

use crate::crypto::{hash_passphrase, verify_passphrase};
use crate::models::{CredentialRow, CredentialRowPatch, NewCredentialRow, Session, User};
use crate::remote::{CredentialTable, IdentityProvider, SignUpResponse};
use crate::{Result, VaultError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Minimum account password length enforced by the hosted identity service
const MIN_ACCOUNT_PASSWORD_LEN: usize = 6;

/// Access token lifetime handed out by [`MemoryIdentity`]
const TOKEN_TTL_SECS: i64 = 3600;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn rejected(status: u16, message: &str) -> VaultError {
    VaultError::Remote {
        status: Some(status),
        message: message.to_string(),
    }
}

struct Account {
    user_id: String,
    email: String,
    password_hash: String,
    confirmed: bool,
}

#[derive(Default)]
struct IdentityState {
    accounts: HashMap<String, Account>,
    active_tokens: HashSet<String>,
    require_confirmation: bool,
}

/// Identity service kept entirely in memory
#[derive(Clone, Default)]
pub struct MemoryIdentity {
    state: Arc<Mutex<IdentityState>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign-ups must be confirmed with [`MemoryIdentity::confirm_email`]
    /// before the account can sign in
    pub fn with_email_confirmation() -> Self {
        let identity = Self::default();
        lock(&identity.state).require_confirmation = true;
        identity
    }

    /// Mark an account as confirmed
    pub fn confirm_email(&self, email: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let account = state
            .accounts
            .get_mut(&email.trim().to_lowercase())
            .ok_or_else(|| VaultError::NotFound(format!("Account {}", email)))?;
        account.confirmed = true;
        Ok(())
    }

    /// Whether `access_token` belongs to a signed-in session
    pub fn is_active(&self, access_token: &str) -> bool {
        lock(&self.state).active_tokens.contains(access_token)
    }

    fn issue_session(state: &mut IdentityState, account_key: &str) -> Option<Session> {
        let account = state.accounts.get(account_key)?;
        let session = Session {
            user: User {
                id: account.user_id.clone(),
                email: Some(account.email.clone()),
            },
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Some(Uuid::new_v4().to_string()),
            expires_at: Some((Utc::now() + Duration::seconds(TOKEN_TTL_SECS)).timestamp()),
        };
        state.active_tokens.insert(session.access_token.clone());
        Some(session)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse> {
        let key = email.trim().to_lowercase();
        if !key.contains('@') {
            return Err(rejected(422, "Unable to validate email address: invalid format"));
        }
        if password.chars().count() < MIN_ACCOUNT_PASSWORD_LEN {
            return Err(rejected(422, "Password should be at least 6 characters"));
        }

        let mut state = lock(&self.state);
        if state.accounts.contains_key(&key) {
            return Err(rejected(422, "User already registered"));
        }

        let confirmed = !state.require_confirmation;
        let user_id = Uuid::new_v4().to_string();
        state.accounts.insert(
            key.clone(),
            Account {
                user_id: user_id.clone(),
                email: email.trim().to_string(),
                password_hash: hash_passphrase(password),
                confirmed,
            },
        );

        let session = if confirmed {
            Self::issue_session(&mut state, &key)
        } else {
            None
        };

        Ok(SignUpResponse {
            user: User {
                id: user_id,
                email: Some(email.trim().to_string()),
            },
            session,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let key = email.trim().to_lowercase();
        let mut state = lock(&self.state);

        let account = state
            .accounts
            .get(&key)
            .filter(|account| verify_passphrase(password, &account.password_hash))
            .ok_or_else(|| rejected(400, "Invalid login credentials"))?;

        if !account.confirmed {
            return Err(rejected(400, "Email not confirmed"));
        }

        Self::issue_session(&mut state, &key)
            .ok_or_else(|| rejected(400, "Invalid login credentials"))
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        lock(&self.state).active_tokens.remove(&session.access_token);
        Ok(())
    }
}

#[derive(Default)]
struct TableState {
    rows: Vec<(u64, CredentialRow)>,
    next_seq: u64,
}

/// Credential table kept entirely in memory.
///
/// Assigns ids and timestamps the way the hosted table does and stores the
/// password column exactly as received.
#[derive(Clone, Default)]
pub struct MemoryTable {
    state: Arc<Mutex<TableState>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row regardless of owner
    pub fn rows(&self) -> Vec<CredentialRow> {
        lock(&self.state)
            .rows
            .iter()
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Store a row verbatim, bypassing id and timestamp assignment
    pub fn insert_row(&self, row: CredentialRow) {
        let mut state = lock(&self.state);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.rows.push((seq, row));
    }
}

#[async_trait]
impl CredentialTable for MemoryTable {
    async fn select_by_owner(&self, session: &Session) -> Result<Vec<CredentialRow>> {
        let state = lock(&self.state);
        let mut owned: Vec<&(u64, CredentialRow)> = state
            .rows
            .iter()
            .filter(|(_, row)| row.user_id == session.user_id())
            .collect();

        // Newest first; insertion order breaks timestamp ties
        owned.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });

        Ok(owned.into_iter().map(|(_, row)| row.clone()).collect())
    }

    async fn select_one(&self, session: &Session, id: &str) -> Result<CredentialRow> {
        lock(&self.state)
            .rows
            .iter()
            .find(|(_, row)| row.id == id && row.user_id == session.user_id())
            .map(|(_, row)| row.clone())
            .ok_or_else(|| VaultError::NotFound(format!("Credential {}", id)))
    }

    async fn insert(&self, _session: &Session, row: NewCredentialRow) -> Result<CredentialRow> {
        let now = Utc::now();
        let stored = CredentialRow {
            id: Uuid::new_v4().to_string(),
            user_id: row.user_id,
            platform: row.platform,
            username: row.username,
            password: row.password,
            email: row.email,
            notes: row.notes,
            created_at: now,
            updated_at: now,
        };

        self.insert_row(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        session: &Session,
        id: &str,
        patch: CredentialRowPatch,
    ) -> Result<CredentialRow> {
        let mut state = lock(&self.state);
        let (_, row) = state
            .rows
            .iter_mut()
            .find(|(_, row)| row.id == id && row.user_id == session.user_id())
            .ok_or_else(|| VaultError::NotFound(format!("Credential {}", id)))?;

        if let Some(platform) = patch.platform {
            row.platform = platform;
        }
        if let Some(username) = patch.username {
            row.username = username;
        }
        if let Some(password) = patch.password {
            row.password = password;
        }
        if let Some(email) = patch.email {
            row.email = email;
        }
        if let Some(notes) = patch.notes {
            row.notes = notes;
        }
        row.updated_at = patch.updated_at;

        Ok(row.clone())
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let before = state.rows.len();
        state
            .rows
            .retain(|(_, row)| !(row.id == id && row.user_id == session.user_id()));

        if state.rows.len() == before {
            return Err(VaultError::NotFound(format!("Credential {}", id)));
        }
        Ok(())
    }
}
