// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL durable store.
//!
//! Every collection shares one table. Records are JSON documents, queried
//! through the dialect's JSON accessor:
//!
//! ```sql
//! CREATE TABLE crud_records (
//!   collection VARCHAR(64) NOT NULL,
//!   id VARCHAR(255) NOT NULL,   -- primary key rendered as text
//!   seq BIGINT,                 -- integer keys only, for allocation and ordering
//!   revision BIGINT,            -- revisioned records only, for guarded writes
//!   payload LONGTEXT NOT NULL,  -- the record document
//!   PRIMARY KEY (collection, id)
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! We use TEXT instead of native JSON type because sqlx's `Any` driver:
//! 1. Doesn't support MySQL's JSON type mapping
//! 2. Treats LONGTEXT/TEXT as BLOB (requires reading as `Vec<u8>` then converting)
//!
//! JSON functions still work on TEXT columns.
//!
//! ## Retries
//!
//! Idempotent statements (reads, upserts, deletes, queries) are retried with
//! [`RetryConfig::query`]. Inserts and guarded updates run once: replaying
//! them after a lost acknowledgement would report a spurious duplicate key or
//! revision mismatch.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::debug;

use super::traits::{DurableStore, StorageError};
use crate::query::{CompiledQuery, Dialect, SqlParam, PAYLOAD_COLUMN, RECORDS_TABLE};
use crate::resilience::retry::{retry, RetryConfig};
use crate::schema::{KeyKind, PrimaryKey, RecordSchema};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Pool settings for [`SqlStore::with_options`].
#[derive(Debug, Clone)]
pub struct SqlOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    /// Connect with default pool settings and startup-mode retry (fails fast
    /// if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_options(connection_string, SqlOptions::default()).await
    }

    pub async fn with_options(
        connection_string: &str,
        options: SqlOptions,
    ) -> Result<Self, StorageError> {
        install_drivers();

        let dialect = Dialect::from_url(connection_string);
        let in_memory = is_in_memory(connection_string);

        // Every connection to an in-memory SQLite database is its own
        // database, so the pool must hold exactly one and never recycle it.
        let pool_options = if in_memory {
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new()
                .max_connections(options.max_connections.max(1))
                .idle_timeout(Duration::from_secs(300))
        };
        let pool_options = pool_options.acquire_timeout(options.acquire_timeout);

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            pool_options
                .clone()
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, dialect };

        if dialect == Dialect::Sqlite && !in_memory {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Enable WAL (Write-Ahead Logging) mode for file-backed SQLite so
    /// readers don't block the writer.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = match self.dialect {
            Dialect::Sqlite => {
                r#"
            CREATE TABLE IF NOT EXISTS crud_records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                seq INTEGER,
                revision INTEGER,
                payload TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#
            }
            // MySQL - LONGTEXT for JSON (sqlx Any driver doesn't support native JSON)
            Dialect::MySql => {
                r#"
            CREATE TABLE IF NOT EXISTS crud_records (
                collection VARCHAR(64) NOT NULL,
                id VARCHAR(255) NOT NULL,
                seq BIGINT NULL,
                revision BIGINT NULL,
                payload LONGTEXT NOT NULL,
                PRIMARY KEY (collection, id),
                INDEX idx_collection_seq (collection, seq)
            )
            "#
            }
        };

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    fn upsert_sql(&self) -> &'static str {
        match self.dialect {
            Dialect::Sqlite => {
                "INSERT INTO crud_records (collection, id, seq, revision, payload) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(collection, id) DO UPDATE SET \
                    seq = excluded.seq, \
                    revision = excluded.revision, \
                    payload = excluded.payload"
            }
            Dialect::MySql => {
                "INSERT INTO crud_records (collection, id, seq, revision, payload) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE \
                    seq = VALUES(seq), \
                    revision = VALUES(revision), \
                    payload = VALUES(payload)"
            }
        }
    }

    /// Next integer key of a collection, inside the insert's transaction.
    async fn next_seq(
        conn: &mut sqlx::AnyConnection,
        collection: &str,
    ) -> Result<i64, StorageError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(seq), 0) + 1 AS next_seq FROM crud_records WHERE collection = ?",
        )
        .bind(collection.to_string())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.try_get::<i64, _>("next_seq")
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        let collection = collection.to_string();
        let id = id.to_string();
        retry("sql_exists", &RetryConfig::query(), || async {
            let result = sqlx::query(
                "SELECT 1 FROM crud_records WHERE collection = ? AND id = ? LIMIT 1",
            )
            .bind(&collection)
            .bind(&id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(result.is_some())
        })
        .await
    }
}

fn is_in_memory(connection_string: &str) -> bool {
    connection_string.starts_with("sqlite:") && connection_string.contains(":memory:")
}

/// Write the key into the document under the schema's key column.
fn keyed_document(schema: &RecordSchema, key: &PrimaryKey, doc: &Value) -> Result<String, StorageError> {
    let mut doc = doc.clone();
    match doc.as_object_mut() {
        Some(fields) => {
            fields.insert(schema.primary_key.to_string(), key.to_value());
        }
        None => {
            return Err(StorageError::Codec(format!(
                "document for '{}' is not an object",
                schema.collection
            )))
        }
    }
    serde_json::to_string(&doc).map_err(|e| StorageError::Codec(e.to_string()))
}

/// Read the payload column as String first (SQLite TEXT), then as bytes
/// (MySQL LONGTEXT).
fn payload_of(row: &AnyRow) -> Result<Value, StorageError> {
    let text = row
        .try_get::<String, _>(PAYLOAD_COLUMN)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(PAYLOAD_COLUMN)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .ok_or_else(|| StorageError::Backend("No payload in row".to_string()))?;

    serde_json::from_str(&text).map_err(|e| StorageError::Codec(e.to_string()))
}

#[async_trait]
impl DurableStore for SqlStore {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn get(&self, schema: &RecordSchema, key: &PrimaryKey) -> Result<Option<Value>, StorageError> {
        let collection = schema.collection.to_string();
        let id = key.to_string();

        let row = retry("sql_get", &RetryConfig::query(), || async {
            sqlx::query("SELECT payload FROM crud_records WHERE collection = ? AND id = ?")
                .bind(&collection)
                .bind(&id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        row.as_ref().map(payload_of).transpose()
    }

    async fn insert(
        &self,
        schema: &RecordSchema,
        key: Option<&PrimaryKey>,
        doc: &Value,
        revision: Option<i64>,
    ) -> Result<PrimaryKey, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let key = match (key, schema.key_kind) {
            (Some(key), _) => key.clone(),
            (None, KeyKind::Integer) => PrimaryKey::Int(Self::next_seq(&mut tx, schema.collection).await?),
            (None, KeyKind::Text) => PrimaryKey::Text(uuid::Uuid::new_v4().to_string()),
        };
        let payload = keyed_document(schema, &key, doc)?;

        sqlx::query(
            "INSERT INTO crud_records (collection, id, seq, revision, payload) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(schema.collection.to_string())
        .bind(key.to_string())
        .bind(key.as_int())
        .bind(revision)
        .bind(payload)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(collection = schema.collection, key = %key, "Inserted record");
        Ok(key)
    }

    async fn put(
        &self,
        schema: &RecordSchema,
        key: &PrimaryKey,
        doc: &Value,
        revision: Option<i64>,
        expected_revision: Option<i64>,
    ) -> Result<(), StorageError> {
        let collection = schema.collection.to_string();
        let id = key.to_string();
        let payload = keyed_document(schema, key, doc)?;

        let Some(expected) = expected_revision else {
            let sql = self.upsert_sql();
            return retry("sql_put", &RetryConfig::query(), || async {
                sqlx::query(sql)
                    .bind(&collection)
                    .bind(&id)
                    .bind(key.as_int())
                    .bind(revision)
                    .bind(&payload)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok(())
            })
            .await;
        };

        let result = sqlx::query(
            "UPDATE crud_records SET revision = ?, payload = ? \
             WHERE collection = ? AND id = ? AND revision = ?",
        )
        .bind(revision)
        .bind(&payload)
        .bind(&collection)
        .bind(&id)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        if self.exists(&collection, &id).await? {
            debug!(collection = %collection, id = %id, expected, "Revision predicate failed");
            Err(StorageError::RevisionMismatch {
                key: crate::schema::cache_key(schema.collection, key),
            })
        } else {
            Err(StorageError::NotFound)
        }
    }

    async fn delete(&self, schema: &RecordSchema, key: &PrimaryKey) -> Result<bool, StorageError> {
        let collection = schema.collection.to_string();
        let id = key.to_string();

        retry("sql_delete", &RetryConfig::query(), || async {
            let result = sqlx::query("DELETE FROM crud_records WHERE collection = ? AND id = ?")
                .bind(&collection)
                .bind(&id)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn query(&self, query: &CompiledQuery) -> Result<Vec<Value>, StorageError> {
        debug_assert!(query.sql.contains(RECORDS_TABLE));

        let rows = retry("sql_query", &RetryConfig::query(), || async {
            let mut statement = sqlx::query(&query.sql);
            for param in &query.params {
                statement = match param {
                    SqlParam::Text(s) => statement.bind(s.clone()),
                    SqlParam::Integer(i) => statement.bind(*i),
                    SqlParam::Float(f) => statement.bind(*f),
                    SqlParam::Boolean(b) => statement.bind(*b),
                    SqlParam::Null => statement.bind(Option::<String>::None),
                };
            }
            statement
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        rows.iter().map(payload_of).collect()
    }
}
