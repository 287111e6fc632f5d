use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use super::traits::{CacheStore, StorageError};

struct Entry {
    snapshot: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process cache of record snapshots.
///
/// Suitable for tests and single-node deployments. Expired entries are
/// dropped lazily when they are next looked up.
pub struct InMemoryStore {
    data: DashMap<String, Entry>,
    ttl: Option<Duration>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            ttl: None,
        }
    }

    /// Entries written from now on expire after `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Get current entry count (expired entries included until touched)
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = Instant::now();
        let snapshot = match self.data.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.snapshot.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        // Expired: drop it outside the read guard.
        self.data.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(snapshot)
    }

    async fn put(&self, key: &str, snapshot: &str) -> Result<(), StorageError> {
        let entry = Entry {
            snapshot: snapshot.to_string(),
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        self.data.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .data
            .get(key)
            .is_some_and(|entry| entry.is_live(Instant::now())))
    }
}
