//! In-memory identity store

use super::{Credential, Identity, IdentityError, IdentityStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Records {
    next_id: u64,
    by_email: HashMap<String, Identity>,
}

impl Records {
    fn insert(&mut self, email: &str, role: Option<String>) -> Identity {
        self.next_id += 1;
        let identity = Identity {
            id: self.next_id,
            email: email.to_string(),
            role,
        };
        self.by_email.insert(email.to_string(), identity.clone());
        identity
    }
}

/// [`IdentityStore`] over a process-local map, keyed by exact email
#[derive(Default)]
pub struct MemoryIdentityStore {
    records: Mutex<Records>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an identity
    pub fn insert(&self, email: &str, role: Option<&str>) -> Identity {
        self.records.lock().insert(email, role.map(str::to_string))
    }

    pub fn get(&self, email: &str) -> Option<Identity> {
        self.records.lock().by_email.get(email).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError> {
        Ok(self.get(email))
    }

    async fn create(
        &self,
        email: &str,
        _credential: &Credential,
    ) -> Result<Identity, IdentityError> {
        let mut records = self.records.lock();
        if records.by_email.contains_key(email) {
            return Err(IdentityError::AlreadyExists);
        }
        Ok(records.insert(email, None))
    }

    async fn set_role(&self, identity: &Identity, role: &str) -> Result<(), IdentityError> {
        let mut records = self.records.lock();
        let record = records
            .by_email
            .get_mut(&identity.email)
            .ok_or_else(|| IdentityError::Unavailable("unknown identity".into()))?;
        record.role = Some(role.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_find() {
        let store = MemoryIdentityStore::new();
        let created = store.create("a@x.com", &Credential::generate()).await.unwrap();
        let found = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(created, found);
        assert!(store.find_by_email("b@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let store = MemoryIdentityStore::new();
        store.create("a@x.com", &Credential::generate()).await.unwrap();
        let result = store.create("a@x.com", &Credential::generate()).await;
        assert_eq!(result, Err(IdentityError::AlreadyExists));
    }

    #[tokio::test]
    async fn test_set_role() {
        let store = MemoryIdentityStore::new();
        let identity = store.insert("a@x.com", None);
        store.set_role(&identity, "editor").await.unwrap();
        assert_eq!(store.get("a@x.com").unwrap().role.as_deref(), Some("editor"));
    }
}
