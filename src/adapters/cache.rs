//! Built-in caches.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::Payload;

use super::Cache;

/// Stores nothing; every lookup misses
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl<T: Send + 'static> Cache<T> for NoopCache {
    fn name(&self) -> &str {
        "noop"
    }

    async fn put(&self, _key: &str, _payload: Payload<T>) -> Result<()> {
        Ok(())
    }

    async fn put_if_absent(&self, _key: &str, _payload: Payload<T>) -> Result<bool> {
        Ok(true)
    }

    async fn get(&self, _key: &str) -> Result<Option<Payload<T>>> {
        Ok(None)
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// In-process concurrent map
#[derive(Debug)]
pub struct LocalCache<T> {
    entries: RwLock<HashMap<String, Payload<T>>>,
}

impl<T> Default for LocalCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LocalCache<T> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Cache<T> for LocalCache<T> {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, key: &str, payload: Payload<T>) -> Result<()> {
        self.entries.write().insert(key.to_string(), payload);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, payload: Payload<T>) -> Result<bool> {
        match self.entries.write().entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(payload);
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Payload<T>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}
