//! Session lifecycle over the hosted identity service.
//!
//! The provider owns the current [`Session`], persists it in the local store
//! so a later process picks it up again, and publishes identity changes on a
//! watch channel. Signing out always clears the key store.

use crate::crypto::KeyStore;
use crate::database::{LocalStore, AUTH_SESSION_KEY};
use crate::models::{Session, User};
use crate::remote::IdentityProvider;
use crate::{DatabaseError, Result, VaultError};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of a sign-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// The account is active and signed in
    SignedIn(User),
    /// The identity service sent a confirmation email; sign in afterwards
    ConfirmationRequired(User),
}

pub struct SessionProvider {
    identity: Arc<dyn IdentityProvider>,
    store: Option<LocalStore>,
    keys: KeyStore,
    current: RwLock<Option<Session>>,
    user_tx: watch::Sender<Option<User>>,
    loading: AtomicBool,
}

impl SessionProvider {
    /// Provider whose session lives only as long as the process
    pub fn new(identity: Arc<dyn IdentityProvider>, keys: KeyStore) -> Self {
        let (user_tx, _) = watch::channel(None);
        Self {
            identity,
            store: None,
            keys,
            current: RwLock::new(None),
            user_tx,
            loading: AtomicBool::new(true),
        }
    }

    /// Provider that persists its session in `store`
    pub fn with_store(identity: Arc<dyn IdentityProvider>, store: LocalStore, keys: KeyStore) -> Self {
        let mut provider = Self::new(identity, keys);
        provider.store = Some(store);
        provider
    }

    /// Load the persisted session, if any, and finish initial resolution.
    ///
    /// Expired or unreadable sessions are discarded.
    pub async fn resolve(&self) -> Result<Option<User>> {
        let restored = self.load_persisted();
        self.loading.store(false, Ordering::SeqCst);

        let session = restored?;
        let user = session.as_ref().map(|s| s.user.clone());
        if let Some(ref user) = user {
            debug!(user_id = %user.id, "Restored persisted session");
        }
        self.replace(session);
        Ok(user)
    }

    fn load_persisted(&self) -> Result<Option<Session>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(raw) = store.get(AUTH_SESSION_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) if !session.is_expired(Utc::now()) => Ok(Some(session)),
            Ok(_) => {
                info!("Persisted session has expired");
                store.remove(AUTH_SESSION_KEY)?;
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding unreadable persisted session: {}", e);
                store.remove(AUTH_SESSION_KEY)?;
                Ok(None)
            }
        }
    }

    /// True until [`SessionProvider::resolve`] has run
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Current identity, if signed in
    pub fn user(&self) -> Option<User> {
        self.session().map(|s| s.user)
    }

    /// Current session, if signed in
    pub fn session(&self) -> Option<Session> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Current session, or `NotAuthenticated` when absent or expired.
    ///
    /// The persisted session is re-read first, so a sign-out or account
    /// switch made by another process on this device takes effect here.
    pub fn current_session(&self) -> Result<Session> {
        self.sync_with_store()?;
        match self.session() {
            Some(session) if !session.is_expired(Utc::now()) => Ok(session),
            _ => Err(VaultError::NotAuthenticated),
        }
    }

    fn sync_with_store(&self) -> Result<()> {
        if self.store.is_none() || self.is_loading() {
            return Ok(());
        }

        let persisted = self.load_persisted()?;
        let current = self.session();
        if persisted == current {
            return Ok(());
        }

        let user_of = |s: &Option<Session>| s.as_ref().map(|s| s.user.id.clone());
        if user_of(&persisted) != user_of(&current) {
            info!("Session changed by another process");
            self.keys.clear_key();
        }
        self.replace(persisted);
        Ok(())
    }

    /// Observe identity changes
    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.user_tx.subscribe()
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        validate_account_input(email, password)?;

        let response = self.identity.sign_up(email.trim(), password).await?;
        match response.session {
            Some(session) => {
                let user = session.user.clone();
                self.establish(session)?;
                info!(user_id = %user.id, "Signed up");
                Ok(SignUpOutcome::SignedIn(user))
            }
            None => {
                info!(user_id = %response.user.id, "Sign-up awaiting email confirmation");
                Ok(SignUpOutcome::ConfirmationRequired(response.user))
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        validate_account_input(email, password)?;

        let session = self.identity.sign_in(email.trim(), password).await?;
        let user = session.user.clone();
        self.establish(session)?;
        info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    /// Sign out remotely and locally.
    ///
    /// Local state (session, persisted session, unlock key) is cleared even
    /// when the identity service call fails; that failure is still returned.
    pub async fn sign_out(&self) -> Result<()> {
        let remote = match self.session() {
            Some(session) => self.identity.sign_out(&session).await,
            None => Ok(()),
        };

        self.keys.clear_key();
        self.replace(None);
        let local = match &self.store {
            Some(store) => store.remove(AUTH_SESSION_KEY),
            None => Ok(()),
        };

        match &remote {
            Ok(()) => info!("Signed out"),
            Err(e) => warn!("Identity service sign-out failed: {}", e),
        }
        remote.and(local)
    }

    fn establish(&self, session: Session) -> Result<()> {
        // A different account must unlock with its own passphrase
        if let Some(previous) = self.session() {
            if previous.user.id != session.user.id {
                self.keys.clear_key();
            }
        }

        if let Some(store) = &self.store {
            let raw = serde_json::to_string(&session)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            store.set(AUTH_SESSION_KEY, &raw)?;
        }
        self.replace(Some(session));
        Ok(())
    }

    fn replace(&self, session: Option<Session>) {
        let user = session.as_ref().map(|s| s.user.clone());
        match self.current.write() {
            Ok(mut current) => *current = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
        self.user_tx.send_if_modified(|current| {
            if *current == user {
                false
            } else {
                *current = user;
                true
            }
        });
    }
}

fn validate_account_input(email: &str, password: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(VaultError::Validation("Email is required".to_string()));
    }
    if password.is_empty() {
        return Err(VaultError::Validation("Password is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::remote::memory::MemoryIdentity;
    use crate::remote::SignUpResponse;
    use async_trait::async_trait;

    fn provider(identity: &MemoryIdentity, store: &LocalStore, keys: &KeyStore) -> SessionProvider {
        SessionProvider::with_store(Arc::new(identity.clone()), store.clone(), keys.clone())
    }

    #[tokio::test]
    async fn test_resolve_without_persisted_session() {
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&MemoryIdentity::new(), &LocalStore::in_memory().unwrap(), &keys);

        assert!(sessions.is_loading());
        assert_eq!(sessions.resolve().await.unwrap(), None);
        assert!(!sessions.is_loading());
        assert!(matches!(
            sessions.current_session(),
            Err(VaultError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_sign_up_signs_in_and_persists() {
        let identity = MemoryIdentity::new();
        let store = LocalStore::in_memory().unwrap();
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&identity, &store, &keys);
        sessions.resolve().await.unwrap();

        let outcome = sessions.sign_up("bob@example.com", "account-pw").await.unwrap();
        let user = match outcome {
            SignUpOutcome::SignedIn(user) => user,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(sessions.user(), Some(user.clone()));
        assert!(store.get(AUTH_SESSION_KEY).unwrap().is_some());

        // A second process over the same store picks the session up
        let restored = provider(&identity, &store, &keys);
        assert_eq!(restored.resolve().await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_sign_up_with_confirmation_has_no_session() {
        let identity = MemoryIdentity::with_email_confirmation();
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&identity, &LocalStore::in_memory().unwrap(), &keys);

        let outcome = sessions.sign_up("new@example.com", "account-pw").await.unwrap();
        assert!(matches!(outcome, SignUpOutcome::ConfirmationRequired(_)));
        assert_eq!(sessions.user(), None);

        identity.confirm_email("new@example.com").unwrap();
        sessions.sign_in("new@example.com", "account-pw").await.unwrap();
        assert!(sessions.user().is_some());
    }

    #[tokio::test]
    async fn test_sign_in_rejects_blank_input_before_remote_call() {
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&MemoryIdentity::new(), &LocalStore::in_memory().unwrap(), &keys);

        assert!(matches!(
            sessions.sign_in("  ", "pw").await,
            Err(VaultError::Validation(_))
        ));
        assert!(matches!(
            sessions.sign_in("bob@example.com", "").await,
            Err(VaultError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let identity = MemoryIdentity::new();
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&identity, &LocalStore::in_memory().unwrap(), &keys);
        let mut rx = sessions.subscribe();
        assert_eq!(*rx.borrow(), None);

        sessions.sign_up("bob@example.com", "account-pw").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_some());

        sessions.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), None);
    }

    #[tokio::test]
    async fn test_sign_out_clears_key_and_session() {
        let identity = MemoryIdentity::new();
        let store = LocalStore::in_memory().unwrap();
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&identity, &store, &keys);

        sessions.sign_up("bob@example.com", "account-pw").await.unwrap();
        let token = sessions.session().unwrap().access_token;
        keys.set_key("hunter2x");

        sessions.sign_out().await.unwrap();

        assert!(!keys.is_set());
        assert_eq!(sessions.user(), None);
        assert_eq!(store.get(AUTH_SESSION_KEY).unwrap(), None);
        assert!(!identity.is_active(&token));
    }

    struct FailingSignOut {
        inner: MemoryIdentity,
    }

    #[async_trait]
    impl IdentityProvider for FailingSignOut {
        async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse> {
            self.inner.sign_up(email, password).await
        }

        async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
            self.inner.sign_in(email, password).await
        }

        async fn sign_out(&self, _session: &Session) -> Result<()> {
            Err(VaultError::transport("connection reset"))
        }
    }

    #[tokio::test]
    async fn test_sign_out_clears_locally_when_remote_fails() {
        let store = LocalStore::in_memory().unwrap();
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = SessionProvider::with_store(
            Arc::new(FailingSignOut {
                inner: MemoryIdentity::new(),
            }),
            store.clone(),
            keys.clone(),
        );

        sessions.sign_up("bob@example.com", "account-pw").await.unwrap();
        keys.set_key("hunter2x");

        let result = sessions.sign_out().await;
        assert!(matches!(result, Err(VaultError::Remote { status: None, .. })));
        assert!(!keys.is_set());
        assert_eq!(sessions.user(), None);
        assert_eq!(store.get(AUTH_SESSION_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_switching_accounts_clears_key() {
        let identity = MemoryIdentity::new();
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&identity, &LocalStore::in_memory().unwrap(), &keys);

        sessions.sign_up("bob@example.com", "account-pw").await.unwrap();
        identity.sign_up("eve@example.com", "account-pw").await.unwrap();
        keys.set_key("hunter2x");

        sessions.sign_in("bob@example.com", "account-pw").await.unwrap();
        assert!(keys.is_set());

        sessions.sign_in("eve@example.com", "account-pw").await.unwrap();
        assert!(!keys.is_set());
    }

    #[tokio::test]
    async fn test_sign_out_elsewhere_is_noticed() {
        let identity = MemoryIdentity::new();
        let store = LocalStore::in_memory().unwrap();
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&identity, &store, &keys);
        sessions.resolve().await.unwrap();
        sessions.sign_up("bob@example.com", "account-pw").await.unwrap();
        keys.set_key("hunter2x");
        let mut rx = sessions.subscribe();
        rx.borrow_and_update();

        // Another process on this device signs out
        let other_keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let other = provider(&identity, &store, &other_keys);
        other.resolve().await.unwrap();
        other.sign_out().await.unwrap();

        assert!(matches!(
            sessions.current_session(),
            Err(VaultError::NotAuthenticated)
        ));
        assert!(!keys.is_set());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), None);
    }

    #[tokio::test]
    async fn test_account_switch_elsewhere_clears_key() {
        let identity = MemoryIdentity::new();
        let store = LocalStore::in_memory().unwrap();
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&identity, &store, &keys);
        sessions.resolve().await.unwrap();
        sessions.sign_up("bob@example.com", "account-pw").await.unwrap();
        identity.sign_up("eve@example.com", "account-pw").await.unwrap();
        keys.set_key("hunter2x");

        let other = provider(&identity, &store, &KeyStore::with_kdf(KdfParams::fast_insecure()));
        other.resolve().await.unwrap();
        other.sign_in("eve@example.com", "account-pw").await.unwrap();

        let session = sessions.current_session().unwrap();
        assert_eq!(session.user.email.as_deref(), Some("eve@example.com"));
        assert!(!keys.is_set());
    }

    #[tokio::test]
    async fn test_expired_persisted_session_is_discarded() {
        let store = LocalStore::in_memory().unwrap();
        let expired = Session {
            user: User {
                id: "user-1".to_string(),
                email: None,
            },
            access_token: "stale".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now().timestamp() - 10),
        };
        store
            .set(AUTH_SESSION_KEY, &serde_json::to_string(&expired).unwrap())
            .unwrap();

        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&MemoryIdentity::new(), &store, &keys);

        assert_eq!(sessions.resolve().await.unwrap(), None);
        assert_eq!(store.get(AUTH_SESSION_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_persisted_session_is_discarded() {
        let store = LocalStore::in_memory().unwrap();
        store.set(AUTH_SESSION_KEY, "{not json").unwrap();

        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = provider(&MemoryIdentity::new(), &store, &keys);

        assert_eq!(sessions.resolve().await.unwrap(), None);
        assert!(!sessions.is_loading());
    }
}
