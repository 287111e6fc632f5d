use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::query::{CompiledQuery, Dialect};
use crate::schema::{PrimaryKey, RecordSchema};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored document could not be decoded: {0}")]
    Codec(String),
    /// A guarded write found a different revision than the caller loaded.
    #[error("Revision predicate failed for '{key}'")]
    RevisionMismatch { key: String },
}

/// Authoritative store of record documents.
///
/// Documents are JSON objects keyed by `(collection, primary key)`. The store
/// writes the primary key into the document under the schema's key column,
/// so a fetched document always deserializes back into a keyed record.
///
/// `revision` arguments are kept next to the document so guarded writes can
/// compare them without knowing the record's layout.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// SQL flavour compiled queries must target.
    fn dialect(&self) -> Dialect;

    async fn get(&self, schema: &RecordSchema, key: &PrimaryKey) -> Result<Option<Value>, StorageError>;

    /// Insert a new document. When `key` is `None` the store allocates one
    /// (next integer for integer keys, a UUID for text keys).
    async fn insert(
        &self,
        schema: &RecordSchema,
        key: Option<&PrimaryKey>,
        doc: &Value,
        revision: Option<i64>,
    ) -> Result<PrimaryKey, StorageError>;

    /// Upsert a document. With `expected_revision` set, the write only applies
    /// when the stored revision equals it; otherwise
    /// [`StorageError::RevisionMismatch`] is returned and nothing changes
    /// ([`StorageError::NotFound`] if the record is gone).
    async fn put(
        &self,
        schema: &RecordSchema,
        key: &PrimaryKey,
        doc: &Value,
        revision: Option<i64>,
        expected_revision: Option<i64>,
    ) -> Result<(), StorageError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, schema: &RecordSchema, key: &PrimaryKey) -> Result<bool, StorageError>;

    /// Execute a compiled query, returning documents in result order.
    async fn query(&self, query: &CompiledQuery) -> Result<Vec<Value>, StorageError>;
}

/// Disposable key-value accelerator holding serialized record snapshots.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&self, key: &str, snapshot: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
