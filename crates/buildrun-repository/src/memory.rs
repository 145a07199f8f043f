//! In-memory repository manager.
//!
//! Used by tests and for dry runs of the service without a repository manager.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::coordinator::PUBLIC_GROUP_ID;
use crate::error::StoreClientError;
use crate::store::{Group, RepositoryStoreService, StoreDescriptor, StoreKey, StoreType};

#[derive(Default)]
struct Inner {
    stores: HashMap<StoreKey, StoreDescriptor>,
    /// Every successful create, in call order.
    created: Vec<(StoreKey, String)>,
    fail_creates: bool,
}

/// Thread-safe [`RepositoryStoreService`] holding stores in a map.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    /// A store that already has the `public` group, like a fresh repository manager.
    pub fn new() -> Self {
        let store = Self::empty();
        store.insert(Group::new(PUBLIC_GROUP_ID).into());
        store
    }

    /// A store with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a store without recording it as created.
    pub fn insert(&self, store: StoreDescriptor) {
        self.lock().stores.insert(store.key(), store);
    }

    /// Make every subsequent `create` fail, to simulate an unreachable manager.
    pub fn set_fail_creates(&self, fail: bool) {
        self.lock().fail_creates = fail;
    }

    pub fn get(&self, key: &StoreKey) -> Option<StoreDescriptor> {
        self.lock().stores.get(key).cloned()
    }

    pub fn group(&self, name: &str) -> Option<Group> {
        match self.get(&StoreKey::group(name)) {
            Some(StoreDescriptor::Group(group)) => Some(group),
            _ => None,
        }
    }

    /// Keys of all stores created through the service, in creation order.
    pub fn created(&self) -> Vec<StoreKey> {
        self.lock().created.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Changelog message recorded when `key` was created.
    pub fn changelog(&self, key: &StoreKey) -> Option<String> {
        self.lock()
            .created
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, message)| message.clone())
    }

    pub fn create_count(&self, store_type: StoreType) -> usize {
        self.lock()
            .created
            .iter()
            .filter(|(key, _)| key.store_type == store_type)
            .count()
    }
}

#[async_trait]
impl RepositoryStoreService for InMemoryStore {
    async fn exists(&self, store_type: StoreType, name: &str) -> Result<bool, StoreClientError> {
        Ok(self
            .lock()
            .stores
            .contains_key(&StoreKey::new(store_type, name)))
    }

    async fn create(
        &self,
        store: &StoreDescriptor,
        changelog: &str,
    ) -> Result<(), StoreClientError> {
        let key = store.key();
        let mut inner = self.lock();
        if inner.fail_creates {
            return Err(StoreClientError::Status {
                status: 503,
                path: key.to_string(),
            });
        }
        if inner.stores.contains_key(&key) {
            return Err(StoreClientError::AlreadyExists(key.to_string()));
        }

        debug!(store = %key, changelog = %changelog, "Creating in-memory store");
        inner.stores.insert(key.clone(), store.clone());
        inner.created.push((key, changelog.to_string()));
        Ok(())
    }

    async fn load_group(&self, name: &str) -> Result<Group, StoreClientError> {
        self.group(name)
            .ok_or_else(|| StoreClientError::NotFound(StoreKey::group(name).to_string()))
    }

    async fn update(
        &self,
        store: &StoreDescriptor,
        _changelog: &str,
    ) -> Result<(), StoreClientError> {
        let key = store.key();
        let mut inner = self.lock();
        match inner.stores.get_mut(&key) {
            Some(existing) => {
                *existing = store.clone();
                Ok(())
            }
            None => Err(StoreClientError::NotFound(key.to_string())),
        }
    }

    fn tracking_url(&self, group_id: &str) -> Result<String, StoreClientError> {
        Ok(format!("memory://folo/track/{group_id}/group/{group_id}"))
    }
}
