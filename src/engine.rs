// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The CRUD engine: read, create, update, delete and query for any
//! [`Record`] type.
//!
//! Each operation composes the same building blocks:
//!
//! | Operation | Steps |
//! |-----------|-------|
//! | `read`    | parse id → fetch (cache, then store) → Read permission |
//! | `create`  | decode → initial revision → insert → populate cache |
//! | `update`  | fetch → Write permission → decode candidate → conflict check → merge → guarded save |
//! | `delete`  | fetch → Write permission → remove |
//! | `query`   | compile → store query → include relations → drop rows failing Read permission |
//!
//! Creation is not permission-checked here: deciding who may create records
//! belongs to the transport layer.
//!
//! # Example
//!
//! ```rust,no_run
//! use crud_engine::{CrudEngine, CrudEngineConfig, Principal, QueryParams};
//! # use crud_engine::{KeyKind, PrimaryKey, Record, RecordSchema};
//! # use serde::{Deserialize, Serialize};
//! # static USERS: RecordSchema = RecordSchema::new("users", "id", KeyKind::Integer, &["id", "name"]);
//! # #[derive(Debug, Clone, Serialize, Deserialize)]
//! # struct User { #[serde(default)] id: i64, name: String }
//! # impl Record for User {
//! #     fn schema() -> &'static RecordSchema { &USERS }
//! #     fn primary_key(&self) -> Option<PrimaryKey> { (self.id > 0).then_some(PrimaryKey::Int(self.id)) }
//! #     fn set_primary_key(&mut self, key: PrimaryKey) { self.id = key.as_int().unwrap_or_default(); }
//! # }
//!
//! # async fn example() -> Result<(), crud_engine::CrudError> {
//! let engine = CrudEngine::connect(CrudEngineConfig::default()).await?;
//! let admin = Principal::new("u-1").with_role("admin");
//!
//! let created: User = engine.create(&serde_json::json!({"name": "Thomas"})).await?;
//! let fetched: User = engine.read("1", &admin).await?;
//! let everyone: Vec<User> = engine.query(&QueryParams::new(), &admin).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashSet;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache_aside::CacheAside;
use crate::config::CrudEngineConfig;
use crate::error::{CrudError, ValidationError};
use crate::metrics::LatencyTimer;
use crate::permission::{can_perform, evaluate, Intent};
use crate::query::{QueryCompiler, QueryParams};
use crate::revision::{check_conflict, merge, revision_of, stamp_initial};
use crate::schema::{from_document, to_document, PrimaryKey, Record, RecordSchema, Relation};
use crate::session::{MemoizedSession, SessionContext};
use crate::storage::memory::InMemoryStore;
use crate::storage::redis::RedisStore;
use crate::storage::sql::SqlStore;
use crate::storage::traits::{CacheStore, DurableStore, StorageError};

pub struct CrudEngine {
    config: CrudEngineConfig,
    store: CacheAside,
    compiler: QueryCompiler,
    /// Collections whose schema passed validation
    validated: DashSet<&'static str>,
}

impl CrudEngine {
    /// Build an engine over already-connected stores.
    pub fn new(
        durable: Arc<dyn DurableStore>,
        cache: Option<Arc<dyn CacheStore>>,
        config: CrudEngineConfig,
    ) -> Self {
        let compiler = QueryCompiler::new(durable.dialect());
        let store = CacheAside::new(durable, cache, config.cache_circuit());
        Self {
            config,
            store,
            compiler,
            validated: DashSet::new(),
        }
    }

    /// Connect the stores named by `config`.
    ///
    /// The durable store must come up. The cache is optional: if Redis cannot
    /// be reached the engine starts without a cache tier.
    pub async fn connect(config: CrudEngineConfig) -> Result<Self, CrudError> {
        let durable = SqlStore::with_options(&config.sql_url, config.sql_options()).await?;
        info!(dialect = ?durable.dialect(), "Durable store connected");

        let cache: Option<Arc<dyn CacheStore>> = match (&config.redis_url, config.cache_enabled) {
            (_, false) => None,
            (Some(url), true) => {
                match RedisStore::with_prefix(url, config.redis_prefix.as_deref()).await {
                    Ok(redis) => {
                        info!("Redis cache connected");
                        Some(Arc::new(redis.with_ttl(config.cache_ttl())))
                    }
                    Err(e) => {
                        warn!(error = %e, "Redis unavailable, running without a cache tier");
                        None
                    }
                }
            }
            (None, true) => Some(Arc::new(InMemoryStore::new().with_ttl(config.cache_ttl()))),
        };

        Ok(Self::new(Arc::new(durable), cache, config))
    }

    #[must_use]
    pub fn config(&self) -> &CrudEngineConfig {
        &self.config
    }

    /// The cache-aside store behind the engine.
    #[must_use]
    pub fn store(&self) -> &CacheAside {
        &self.store
    }

    // --- Operations ---

    /// Load one record the session may read.
    #[tracing::instrument(skip(self, session), fields(collection = R::schema().collection))]
    pub async fn read<R: Record>(
        &self,
        raw_id: &str,
        session: &dyn SessionContext,
    ) -> Result<R, CrudError> {
        let _timer = LatencyTimer::new("read");
        let result: Result<R, CrudError> = async {
            let key = self.parse_id::<R>(raw_id)?;
            let record: R = self.store.fetch_one(&key).await?;
            can_perform(&record, session, Intent::Read).await?;
            Ok(record)
        }
        .await;
        finish("read", result)
    }

    /// Create a record from a JSON body. Returns it with its allocated key and
    /// initial revision.
    #[tracing::instrument(skip(self, body), fields(collection = R::schema().collection))]
    pub async fn create<R: Record>(&self, body: &Value) -> Result<R, CrudError> {
        let _timer = LatencyTimer::new("create");
        let result: Result<R, CrudError> = async {
            self.ensure_schema::<R>()?;
            let mut record: R = decode_body(body)?;
            stamp_initial(&mut record);
            self.store.insert(record).await
        }
        .await;
        finish("create", result)
    }

    /// Apply the fields in `body` to an existing record.
    ///
    /// When the record type carries a revision, `body` must carry the revision
    /// the caller last saw. A stale one fails with [`CrudError::Conflict`]
    /// holding the current record and leaves the store untouched.
    #[tracing::instrument(skip(self, body, session), fields(collection = R::schema().collection))]
    pub async fn update<R: Record>(
        &self,
        raw_id: &str,
        body: &Value,
        session: &dyn SessionContext,
    ) -> Result<R, CrudError> {
        let _timer = LatencyTimer::new("update");
        let result: Result<R, CrudError> = async {
            let key = self.parse_id::<R>(raw_id)?;
            let current: R = self.store.fetch_one(&key).await?;
            can_perform(&current, session, Intent::Write).await?;

            let candidate: R = decode_body(body)?;
            if !check_conflict(&current, &candidate) {
                debug!(key = %key, "Stale revision in update request");
                return Err(CrudError::Conflict {
                    current: to_document(&current)?,
                });
            }

            let merged = merge(&current, body)?;
            match revision_of(&current) {
                Some(expected) => self.save_guarded(&key, &merged, expected).await?,
                None => self.store.save(&merged).await?,
            }
            Ok(merged)
        }
        .await;
        finish("update", result)
    }

    /// Delete a record the session may write.
    #[tracing::instrument(skip(self, session), fields(collection = R::schema().collection))]
    pub async fn delete<R: Record>(
        &self,
        raw_id: &str,
        session: &dyn SessionContext,
    ) -> Result<(), CrudError> {
        let _timer = LatencyTimer::new("delete");
        let result: Result<(), CrudError> = async {
            let key = self.parse_id::<R>(raw_id)?;
            let current: R = self.store.fetch_one(&key).await?;
            can_perform(&current, session, Intent::Write).await?;
            self.store.remove(&current).await
        }
        .await;
        finish("delete", result)
    }

    /// Run a structured query against the durable store and return the rows
    /// the session may read, in result order.
    ///
    /// A denied row is dropped; it never fails the whole query. The principal
    /// is resolved at most once.
    #[tracing::instrument(skip(self, params, session), fields(collection = R::schema().collection))]
    pub async fn query<R: Record>(
        &self,
        params: &QueryParams,
        session: &dyn SessionContext,
    ) -> Result<Vec<R>, CrudError> {
        let _timer = LatencyTimer::new("query");
        let result: Result<Vec<R>, CrudError> = async {
            let schema = self.ensure_schema::<R>()?;
            let compiled = self.compiler.compile(schema, params)?;
            debug!(sql = %compiled.render_inline(), "Compiled query");

            let mut rows = self.store.durable().query(&compiled).await?;
            crate::metrics::record_query_rows("fetched", rows.len());

            let session = MemoizedSession::new(session);
            if !compiled.includes.is_empty() {
                self.load_includes(&compiled.includes, &mut rows, &session).await?;
            }

            let mut visible = Vec::with_capacity(rows.len());
            for row in rows {
                let record: R = from_document(row)?;
                match can_perform(&record, &session, Intent::Read).await {
                    Ok(()) => visible.push(record),
                    Err(CrudError::Unauthorized) => continue,
                    Err(e) => return Err(e),
                }
            }
            crate::metrics::record_query_rows("visible", visible.len());
            Ok(visible)
        }
        .await;
        finish("query", result)
    }

    /// [`query`](Self::query) with the request body still in JSON form.
    pub async fn query_json<R: Record>(
        &self,
        body: &Value,
        session: &dyn SessionContext,
    ) -> Result<Vec<R>, CrudError> {
        let params: QueryParams = match serde_json::from_value(body.clone()) {
            Ok(params) => params,
            Err(e) => {
                let err = CrudError::from(ValidationError::MalformedBody(e.to_string()));
                return finish("query", Err(err));
            }
        };
        self.query(&params, session).await
    }

    // --- Internals ---

    fn ensure_schema<R: Record>(&self) -> Result<&'static RecordSchema, CrudError> {
        let schema = R::schema();
        if !self.validated.contains(schema.collection) {
            schema.validate()?;
            self.validated.insert(schema.collection);
        }
        Ok(schema)
    }

    fn parse_id<R: Record>(&self, raw_id: &str) -> Result<PrimaryKey, CrudError> {
        let schema = self.ensure_schema::<R>()?;
        Ok(PrimaryKey::parse(raw_id, schema.key_kind)?)
    }

    /// Guarded write. If another writer got there first, reload the fresh
    /// record from the store and report it as the conflict.
    async fn save_guarded<R: Record>(
        &self,
        key: &PrimaryKey,
        merged: &R,
        expected: i64,
    ) -> Result<(), CrudError> {
        match self.store.save_guarded(merged, expected).await {
            Err(CrudError::Storage(StorageError::RevisionMismatch { key: cache_key })) => {
                warn!(key = %cache_key, expected, "Concurrent update detected");
                // The cached snapshot may be what misled us.
                self.store.evict::<R>(key).await;
                let fresh: R = self.store.fetch_one(key).await?;
                Err(CrudError::Conflict {
                    current: to_document(&fresh)?,
                })
            }
            other => other,
        }
    }

    /// Embed related records under each relation's name. A missing or
    /// dangling reference embeds `null`, as does a related record the session
    /// may not read.
    async fn load_includes(
        &self,
        relations: &[&'static Relation],
        rows: &mut [Value],
        session: &dyn SessionContext,
    ) -> Result<(), CrudError> {
        let mut loaded: HashMap<(&'static str, PrimaryKey), Value> = HashMap::new();

        for row in rows.iter_mut() {
            let Value::Object(fields) = row else { continue };
            for relation in relations {
                let target = (relation.target)();
                let related = match fields.get(relation.local_key).and_then(reference_key) {
                    Some(key) => {
                        let slot = (target.collection, key);
                        if let Some(doc) = loaded.get(&slot) {
                            doc.clone()
                        } else {
                            let doc = self
                                .store
                                .durable()
                                .get(target, &slot.1)
                                .await?
                                .unwrap_or(Value::Null);
                            loaded.insert(slot, doc.clone());
                            doc
                        }
                    }
                    None => Value::Null,
                };
                let related = authorize_related(relation, related, session).await?;
                fields.insert(relation.name.to_string(), related);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CrudEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudEngine")
            .field("dialect", &self.compiler.dialect())
            .field("store", &self.store)
            .finish()
    }
}

fn decode_body<R: Record>(body: &Value) -> Result<R, CrudError> {
    if !body.is_object() {
        return Err(ValidationError::MalformedBody("body must be a JSON object".into()).into());
    }
    serde_json::from_value(body.clone())
        .map_err(|e| ValidationError::MalformedBody(e.to_string()).into())
}

async fn authorize_related(
    relation: &Relation,
    doc: Value,
    session: &dyn SessionContext,
) -> Result<Value, CrudError> {
    if doc.is_null() {
        return Ok(doc);
    }
    let Some(roles) = (relation.read_roles)(&doc) else {
        return Ok(doc);
    };
    match evaluate(&roles, session, Intent::Read).await {
        Ok(()) => Ok(doc),
        Err(CrudError::Unauthorized) => {
            debug!(relation = relation.name, "Related record hidden from session");
            Ok(Value::Null)
        }
        Err(e) => Err(e),
    }
}

fn reference_key(value: &Value) -> Option<PrimaryKey> {
    match value {
        Value::Number(n) => n.as_i64().map(PrimaryKey::Int),
        Value::String(s) if !s.is_empty() => Some(PrimaryKey::Text(s.clone())),
        _ => None,
    }
}

fn finish<T>(operation: &str, result: Result<T, CrudError>) -> Result<T, CrudError> {
    match &result {
        Ok(_) => crate::metrics::record_operation(operation, "success"),
        Err(e) => {
            debug!(operation, error = %e, "Operation failed");
            crate::metrics::record_operation(operation, e.kind());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Authorizer, Permission};
    use crate::revision::Revisioned;
    use crate::schema::KeyKind;
    use crate::session::{Anonymous, Principal, SessionError};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    static DOCS: RecordSchema = RecordSchema::new(
        "docs",
        "id",
        KeyKind::Integer,
        &["id", "title", "revision", "permission"],
    );

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        #[serde(default)]
        id: i64,
        #[serde(default)]
        title: String,
        #[serde(default)]
        revision: i64,
        #[serde(default)]
        permission: Permission,
    }

    impl Revisioned for Doc {
        fn current_revision(&self) -> i64 {
            self.revision
        }

        fn set_revision(&mut self, revision: i64) {
            self.revision = revision;
        }
    }

    impl Record for Doc {
        fn schema() -> &'static RecordSchema {
            &DOCS
        }

        fn primary_key(&self) -> Option<PrimaryKey> {
            (self.id > 0).then_some(PrimaryKey::Int(self.id))
        }

        fn set_primary_key(&mut self, key: PrimaryKey) {
            self.id = key.as_int().unwrap_or_default();
        }

        fn as_revisioned(&self) -> Option<&dyn Revisioned> {
            Some(self)
        }

        fn as_revisioned_mut(&mut self) -> Option<&mut dyn Revisioned> {
            Some(self)
        }

        fn as_authorizer(&self) -> Option<&dyn Authorizer> {
            Some(&self.permission)
        }
    }

    static BROKEN: RecordSchema = RecordSchema::new("broken", "uid", KeyKind::Integer, &["id"]);

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Broken {
        id: i64,
    }

    impl Record for Broken {
        fn schema() -> &'static RecordSchema {
            &BROKEN
        }

        fn primary_key(&self) -> Option<PrimaryKey> {
            Some(PrimaryKey::Int(self.id))
        }

        fn set_primary_key(&mut self, key: PrimaryKey) {
            self.id = key.as_int().unwrap_or_default();
        }
    }

    struct FailingSession;

    #[async_trait]
    impl SessionContext for FailingSession {
        async fn current_principal(&self) -> Result<Option<Principal>, SessionError> {
            Err(SessionError::Backend("session store down".into()))
        }
    }

    async fn engine() -> CrudEngine {
        CrudEngine::connect(CrudEngineConfig::default()).await.unwrap()
    }

    fn editor() -> Principal {
        Principal::new("u-1").with_role("editor")
    }

    fn body(title: &str) -> Value {
        json!({
            "title": title,
            "permission": {"Read": ["editor", "viewer"], "Write": ["editor"]}
        })
    }

    #[tokio::test]
    async fn test_create_stamps_key_and_revision() {
        let engine = engine().await;
        let doc: Doc = engine.create(&body("first")).await.unwrap();
        assert_eq!(doc.id, 1);
        assert_eq!(doc.revision, 1);
    }

    #[tokio::test]
    async fn test_read_checks_permission() {
        let engine = engine().await;
        let _: Doc = engine.create(&body("secret")).await.unwrap();

        let doc: Doc = engine.read("1", &editor()).await.unwrap();
        assert_eq!(doc.title, "secret");

        let denied = engine.read::<Doc>("1", &Anonymous).await;
        assert!(matches!(denied, Err(CrudError::Unauthorized)));

        let failing = engine.read::<Doc>("1", &FailingSession).await;
        assert!(matches!(failing, Err(CrudError::Session(_))));
    }

    #[tokio::test]
    async fn test_bad_ids_are_validation_errors() {
        let engine = engine().await;
        let missing = engine.read::<Doc>("", &editor()).await.unwrap_err();
        assert_eq!(missing.status_code(), 400);

        let invalid = engine.read::<Doc>("abc", &editor()).await.unwrap_err();
        assert!(matches!(invalid, CrudError::Validation(ValidationError::InvalidId(_))));

        let absent = engine.read::<Doc>("99", &editor()).await.unwrap_err();
        assert_eq!(absent.status_code(), 404);
    }

    #[tokio::test]
    async fn test_update_conflict_leaves_store_untouched() {
        let engine = engine().await;
        let _: Doc = engine.create(&body("draft")).await.unwrap();

        let stale = engine
            .update::<Doc>("1", &json!({"title": "lost", "revision": 0}), &editor())
            .await
            .unwrap_err();
        match stale {
            CrudError::Conflict { current } => {
                assert_eq!(current["revision"], 1);
                assert_eq!(current["title"], "draft");
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let fresh: Doc = engine
            .update("1", &json!({"title": "final", "revision": 1}), &editor())
            .await
            .unwrap();
        assert_eq!(fresh.revision, 2);
        assert_eq!(fresh.title, "final");
        assert_eq!(fresh.permission.write, vec!["editor".to_string()]);
    }

    #[tokio::test]
    async fn test_update_requires_write_role() {
        let engine = engine().await;
        let _: Doc = engine.create(&body("draft")).await.unwrap();
        let viewer = Principal::new("u-2").with_role("viewer");

        let denied = engine
            .update::<Doc>("1", &json!({"title": "x", "revision": 1}), &viewer)
            .await;
        assert!(matches!(denied, Err(CrudError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_update_rejects_malformed_body() {
        let engine = engine().await;
        let _: Doc = engine.create(&body("draft")).await.unwrap();

        let err = engine
            .update::<Doc>("1", &json!({"title": 42, "revision": 1}), &editor())
            .await
            .unwrap_err();
        assert!(matches!(err, CrudError::Validation(ValidationError::MalformedBody(_))));

        let err = engine.update::<Doc>("1", &json!([1, 2]), &editor()).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_stale_cache_yields_conflict_with_fresh_record() {
        let engine = engine().await;
        let created: Doc = engine.create(&body("draft")).await.unwrap();

        // Another writer bumps the stored revision behind the cache's back.
        let mut newer = created.clone();
        newer.title = "theirs".into();
        newer.revision = 2;
        let doc = to_document(&newer).unwrap();
        engine
            .store()
            .durable()
            .put(&DOCS, &PrimaryKey::Int(1), &doc, Some(2), None)
            .await
            .unwrap();

        let err = engine
            .update::<Doc>("1", &json!({"title": "mine", "revision": 1}), &editor())
            .await
            .unwrap_err();
        match err {
            CrudError::Conflict { current } => {
                assert_eq!(current["title"], "theirs");
                assert_eq!(current["revision"], 2);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_then_delete_again() {
        let engine = engine().await;
        let _: Doc = engine.create(&body("temp")).await.unwrap();

        engine.delete::<Doc>("1", &editor()).await.unwrap();
        let again = engine.delete::<Doc>("1", &editor()).await;
        assert!(matches!(again, Err(CrudError::NotFound)));
        assert!(matches!(engine.read::<Doc>("1", &editor()).await, Err(CrudError::NotFound)));
    }

    #[tokio::test]
    async fn test_query_drops_unreadable_rows_in_order() {
        let engine = engine().await;
        let _: Doc = engine.create(&body("a")).await.unwrap();
        let _: Doc = engine
            .create(&json!({"title": "hidden", "permission": {"Read": ["admin"], "Write": []}}))
            .await
            .unwrap();
        let _: Doc = engine.create(&body("c")).await.unwrap();

        let visible: Vec<Doc> = engine.query(&QueryParams::new(), &editor()).await.unwrap();
        let titles: Vec<&str> = visible.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "c"]);

        let failing = engine.query::<Doc>(&QueryParams::new(), &FailingSession).await;
        assert!(matches!(failing, Err(CrudError::Session(_))));
    }

    #[tokio::test]
    async fn test_query_json_rejects_malformed_body() {
        let engine = engine().await;
        let err = engine
            .query_json::<Doc>(&json!({"where": "name = 1"}), &editor())
            .await
            .unwrap_err();
        assert!(matches!(err, CrudError::Validation(ValidationError::MalformedBody(_))));

        let err = engine
            .query_json::<Doc>(&json!({"where": [{"key": "title", "op": "DROP TABLE", "val": 1}]}), &editor())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_invalid_schema_is_reported() {
        let engine = engine().await;
        let err = engine.read::<Broken>("1", &Anonymous).await.unwrap_err();
        assert!(matches!(err, CrudError::Schema(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_engine_without_cache() {
        let config = CrudEngineConfig {
            cache_enabled: false,
            ..Default::default()
        };
        let engine = CrudEngine::connect(config).await.unwrap();
        assert!(!engine.store().has_cache());

        let created: Doc = engine.create(&body("plain")).await.unwrap();
        let read: Doc = engine.read("1", &editor()).await.unwrap();
        assert_eq!(created, read);
    }
}
