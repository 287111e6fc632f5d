// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache-aside store.
//!
//! Wraps the durable store with a disposable cache of record snapshots:
//!
//! ```text
//! fetch_one:  cache ──hit──▶ record
//!               │ miss / error / corrupt
//!               ▼
//!             durable ──▶ write-back to cache ──▶ record
//!
//! save / insert:  durable ──ok──▶ overwrite cache entry
//! remove:         durable ──ok──▶ drop cache entry
//! ```
//!
//! The durable store is authoritative. Cache failures are logged, counted and
//! swallowed; they never fail an operation. The cache tier sits behind a
//! circuit breaker, so while it is down every call goes straight to the
//! durable store.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CrudError;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
use crate::revision::revision_of;
use crate::schema::{cache_key, from_document, identity, to_document, PrimaryKey, Record};
use crate::storage::traits::{CacheStore, DurableStore, StorageError};

pub struct CacheAside {
    durable: Arc<dyn DurableStore>,
    cache: Option<Arc<dyn CacheStore>>,
    breaker: CircuitBreaker,
}

impl CacheAside {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        cache: Option<Arc<dyn CacheStore>>,
        circuit: CircuitConfig,
    ) -> Self {
        Self {
            durable,
            cache,
            breaker: CircuitBreaker::new("cache", circuit),
        }
    }

    /// The authoritative store, for multi-record queries that bypass the cache.
    #[must_use]
    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Load one record, preferring the cache.
    #[tracing::instrument(skip(self), fields(collection = R::schema().collection, source))]
    pub async fn fetch_one<R: Record>(&self, key: &PrimaryKey) -> Result<R, CrudError> {
        let schema = R::schema();
        let cache_key = cache_key(schema.collection, key);

        if let Some(snapshot) = self.cache_get(&cache_key).await {
            match serde_json::from_str::<R>(&snapshot) {
                Ok(record) => {
                    tracing::Span::current().record("source", "cache");
                    debug!("Cache hit");
                    crate::metrics::record_cache("hit");
                    return Ok(record);
                }
                Err(e) => {
                    warn!(key = %cache_key, error = %e, "Discarding undecodable cache snapshot");
                    crate::metrics::record_cache("corrupt");
                }
            }
        }

        let doc = self
            .durable
            .get(schema, key)
            .await?
            .ok_or(StorageError::NotFound)?;
        let record: R = from_document(doc)?;
        tracing::Span::current().record("source", "store");
        debug!("Loaded from durable store");

        self.after_write(&cache_key, &record).await;
        Ok(record)
    }

    /// Insert a new record, letting the store allocate the key when the record
    /// has none. Returns the record carrying its final key.
    #[tracing::instrument(skip(self, record), fields(collection = R::schema().collection))]
    pub async fn insert<R: Record>(&self, mut record: R) -> Result<R, CrudError> {
        let schema = R::schema();
        let doc = to_document(&record)?;
        let requested = record.primary_key();

        let key = self
            .durable
            .insert(schema, requested.as_ref(), &doc, revision_of(&record))
            .await?;
        record.set_primary_key(key.clone());
        debug!(key = %key, "Inserted");

        self.after_write(&cache_key(schema.collection, &key), &record).await;
        Ok(record)
    }

    /// Persist `record` unconditionally, then refresh its cache entry.
    #[tracing::instrument(skip(self, record), fields(collection = R::schema().collection))]
    pub async fn save<R: Record>(&self, record: &R) -> Result<(), CrudError> {
        self.persist(record, None).await
    }

    /// Persist `record` only if the stored revision still equals `expected`.
    ///
    /// A lost race surfaces as `StorageError::RevisionMismatch` and leaves
    /// both the store and the cache untouched.
    #[tracing::instrument(skip(self, record), fields(collection = R::schema().collection))]
    pub async fn save_guarded<R: Record>(&self, record: &R, expected: i64) -> Result<(), CrudError> {
        self.persist(record, Some(expected)).await
    }

    /// Delete `record` from the store, then drop its cache entry.
    ///
    /// Returns `NotFound` when the store had nothing to delete. The cache entry
    /// is dropped either way.
    #[tracing::instrument(skip(self, record), fields(collection = R::schema().collection))]
    pub async fn remove<R: Record>(&self, record: &R) -> Result<(), CrudError> {
        let id = identity(record)?;
        let removed = self.durable.delete(R::schema(), &id.primary_key).await?;

        self.after_remove(&id.cache_key()).await;

        if removed {
            debug!(key = %id.primary_key, "Removed");
            Ok(())
        } else {
            Err(CrudError::NotFound)
        }
    }

    /// Drop a cached snapshot without touching the store.
    pub async fn evict<R: Record>(&self, key: &PrimaryKey) {
        self.after_remove(&cache_key(R::schema().collection, key)).await;
    }

    async fn persist<R: Record>(&self, record: &R, expected: Option<i64>) -> Result<(), CrudError> {
        let schema = R::schema();
        let id = identity(record)?;
        let doc = to_document(record)?;

        self.durable
            .put(schema, &id.primary_key, &doc, revision_of(record), expected)
            .await?;

        self.after_write(&id.cache_key(), record).await;
        Ok(())
    }

    // --- Post-write hooks ---

    /// Overwrite the cache entry with the record's current snapshot.
    async fn after_write<R: Record>(&self, cache_key: &str, record: &R) {
        let Some(cache) = &self.cache else { return };

        let snapshot = match serde_json::to_string(record) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Cannot snapshot record for cache");
                return;
            }
        };

        match self.breaker.call(|| cache.put(cache_key, &snapshot)).await {
            Ok(()) => crate::metrics::record_cache("write"),
            Err(CircuitError::Rejected) => crate::metrics::record_cache("skipped"),
            Err(CircuitError::Inner(e)) => {
                warn!(key = %cache_key, error = %e, "Cache write failed, store remains authoritative");
                crate::metrics::record_cache("error");
            }
        }
    }

    async fn after_remove(&self, cache_key: &str) {
        let Some(cache) = &self.cache else { return };

        match self.breaker.call(|| cache.delete(cache_key)).await {
            Ok(()) => crate::metrics::record_cache("evict"),
            Err(CircuitError::Rejected) => {
                warn!(key = %cache_key, "Cache circuit open, stale entry may survive delete");
                crate::metrics::record_cache("skipped");
            }
            Err(CircuitError::Inner(e)) => {
                warn!(key = %cache_key, error = %e, "Cache delete failed, stale entry may survive");
                crate::metrics::record_cache("error");
            }
        }
    }

    async fn cache_get(&self, cache_key: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;

        match self.breaker.call(|| cache.get(cache_key)).await {
            Ok(Some(snapshot)) => Some(snapshot),
            Ok(None) => {
                crate::metrics::record_cache("miss");
                None
            }
            Err(CircuitError::Rejected) => {
                crate::metrics::record_cache("skipped");
                None
            }
            Err(CircuitError::Inner(e)) => {
                warn!(key = %cache_key, error = %e, "Cache lookup failed, falling back to store");
                crate::metrics::record_cache("error");
                None
            }
        }
    }
}

impl std::fmt::Debug for CacheAside {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("has_cache", &self.has_cache())
            .field("breaker", &self.breaker)
            .finish()
    }
}
