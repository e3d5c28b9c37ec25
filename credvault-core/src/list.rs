//! Client-side view of the user's credentials.
//!
//! Mirrors what the remote table holds after each successful operation
//! without refetching. A failed operation leaves the contents as they were.

use crate::models::{Credential, CredentialPatch, NewCredential};
use crate::repository::CredentialRepository;
use crate::Result;

#[derive(Debug, Default)]
pub struct CredentialList {
    items: Vec<Credential>,
    loading: bool,
}

impl CredentialList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True while a refresh is running
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Replace the contents with a fresh fetch
    pub async fn refresh(&mut self, repo: &CredentialRepository) -> Result<()> {
        self.loading = true;
        let fetched = repo.list().await;
        self.loading = false;

        self.items = fetched?;
        Ok(())
    }

    /// Create a credential and put it at the front
    pub async fn add(
        &mut self,
        repo: &CredentialRepository,
        new: NewCredential,
    ) -> Result<Credential> {
        let created = repo.create(new).await?;
        self.items.insert(0, created.clone());
        Ok(created)
    }

    /// Update a credential and replace it in place
    pub async fn update(
        &mut self,
        repo: &CredentialRepository,
        id: &str,
        patch: CredentialPatch,
    ) -> Result<Credential> {
        let updated = repo.update(id, patch).await?;
        if let Some(existing) = self.items.iter_mut().find(|c| c.id == updated.id) {
            *existing = updated.clone();
        }
        Ok(updated)
    }

    /// Delete a credential and drop it from the list
    pub async fn remove(&mut self, repo: &CredentialRepository, id: &str) -> Result<()> {
        repo.delete(id).await?;
        let id = id.trim();
        self.items.retain(|c| c.id != id);
        Ok(())
    }

    /// Credentials whose platform, username or email contains `term`,
    /// ignoring case. An empty term matches everything.
    pub fn search(&self, term: &str) -> Vec<&Credential> {
        self.items.iter().filter(|c| c.matches(term)).collect()
    }

    /// Forget everything, e.g. after sign-out
    pub fn clear(&mut self) {
        self.items.clear();
        self.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KdfParams, KeyStore};
    use crate::remote::memory::{MemoryIdentity, MemoryTable};
    use crate::session::SessionProvider;
    use crate::VaultError;
    use std::sync::Arc;

    async fn unlocked_repo() -> (CredentialRepository, KeyStore) {
        let keys = KeyStore::with_kdf(KdfParams::fast_insecure());
        let sessions = Arc::new(SessionProvider::new(
            Arc::new(MemoryIdentity::new()),
            keys.clone(),
        ));
        sessions
            .sign_up("bob@example.com", "account-pw")
            .await
            .unwrap();
        keys.set_key("hunter2x");

        let repo = CredentialRepository::new(Arc::new(MemoryTable::new()), sessions, keys.clone());
        (repo, keys)
    }

    fn credential(platform: &str, username: &str, email: Option<&str>) -> NewCredential {
        NewCredential {
            platform: platform.to_string(),
            username: username.to_string(),
            password: "p@ss1".to_string(),
            email: email.map(str::to_string),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_mutations_update_the_list_in_place() {
        let (repo, _keys) = unlocked_repo().await;
        let mut list = CredentialList::new();

        let mail = list.add(&repo, credential("Mail", "bob", None)).await.unwrap();
        let bank = list.add(&repo, credential("Bank", "bob", None)).await.unwrap();
        assert_eq!(list.credentials()[0].id, bank.id);

        let patch = CredentialPatch {
            username: Some("robert".to_string()),
            ..Default::default()
        };
        list.update(&repo, &mail.id, patch).await.unwrap();
        assert_eq!(list.credentials()[1].username, "robert");

        list.remove(&repo, &bank.id).await.unwrap();
        assert_eq!(list.len(), 1);

        // The list agrees with a fresh fetch
        let mut fresh = CredentialList::new();
        fresh.refresh(&repo).await.unwrap();
        assert_eq!(fresh.credentials(), list.credentials());
    }

    #[tokio::test]
    async fn test_failures_leave_contents_unchanged() {
        let (repo, keys) = unlocked_repo().await;
        let mut list = CredentialList::new();
        list.add(&repo, credential("Mail", "bob", None)).await.unwrap();
        let before = list.credentials().to_vec();

        keys.clear_key();
        assert!(matches!(
            list.refresh(&repo).await,
            Err(VaultError::MasterPasswordRequired)
        ));
        assert!(!list.is_loading());
        assert!(list
            .add(&repo, credential("Bank", "bob", None))
            .await
            .is_err());

        keys.set_key("hunter2x");
        assert!(list.remove(&repo, "missing").await.is_err());
        assert_eq!(list.credentials(), before.as_slice());
    }

    #[tokio::test]
    async fn test_search_matches_platform_username_and_email() {
        let (repo, _keys) = unlocked_repo().await;
        let mut list = CredentialList::new();
        list.add(&repo, credential("GitHub", "octocat", None)).await.unwrap();
        list.add(&repo, credential("Mail", "bob", Some("Bob@Example.com")))
            .await
            .unwrap();

        assert_eq!(list.search("").len(), 2);
        assert_eq!(list.search("GIT")[0].platform, "GitHub");
        assert_eq!(list.search("example")[0].platform, "Mail");
        assert!(list.search("gitlab").is_empty());

        list.clear();
        assert!(list.is_empty());
    }
}
