//! Time-bounded key-value cache
//!
//! [`CacheStore`] is the storage seam used by the key set cache. Values decide
//! their own freshness through [`Expiring`]; a store keeps expired values
//! until it needs room, so callers can still fall back to them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default bound on the number of entries held by [`MemoryCache`]
const DEFAULT_MAX_ENTRIES: usize = 1_024;

/// A value with a freshness window
pub trait Expiring {
    fn is_expired(&self) -> bool;
}

impl<T: Expiring + ?Sized> Expiring for Arc<T> {
    fn is_expired(&self) -> bool {
        (**self).is_expired()
    }
}

/// Generic cache interface
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Get a value, expired or not
    async fn get(&self, key: &str) -> Option<V>;

    /// Store a value, replacing any previous one
    async fn put(&self, key: &str, value: V);

    /// Drop a value
    async fn invalidate(&self, key: &str);
}

/// In-process [`CacheStore`]
pub struct MemoryCache<V> {
    entries: RwLock<HashMap<String, V>>,
    max_entries: usize,
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemoryCache<V> {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryCache<V>
where
    V: Expiring + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: V) {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, v| !v.is_expired());

            // Still full: drop an arbitrary entry
            if entries.len() >= self.max_entries {
                if let Some(victim) = entries.keys().next().cloned() {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(key.to_string(), value);
    }

    async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}
