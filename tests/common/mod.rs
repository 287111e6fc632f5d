//! Record types shared by the integration test binaries.

#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crud_engine::storage::memory::InMemoryStore;
use crud_engine::storage::sql::SqlStore;
use crud_engine::{
    Authorizer, CacheStore, CrudEngine, CrudEngineConfig, DurableStore, KeyKind, Permission,
    PrimaryKey, Record, RecordSchema, Relation, Revisioned,
};

pub static USERS: RecordSchema = RecordSchema::new(
    "users",
    "id",
    KeyKind::Integer,
    &["id", "name", "age", "revision", "permission"],
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: i64,
    #[serde(default)]
    pub revision: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<Permission>,
}

impl Revisioned for User {
    fn current_revision(&self) -> i64 {
        self.revision
    }

    fn set_revision(&mut self, revision: i64) {
        self.revision = revision;
    }
}

impl Record for User {
    fn schema() -> &'static RecordSchema {
        &USERS
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
        self.permission.as_ref().map(|p| p as &dyn Authorizer)
    }
}

fn users() -> &'static RecordSchema {
    &USERS
}

static POST_RELATIONS: [Relation; 1] = [Relation::belongs_to("author", "author_id", users)];

pub static POSTS: RecordSchema =
    RecordSchema::new("posts", "id", KeyKind::Integer, &["id", "title", "author_id"])
        .with_relations(&POST_RELATIONS);

/// Public, unrevisioned record with a belongs-to relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
}

impl Record for Post {
    fn schema() -> &'static RecordSchema {
        &POSTS
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        (self.id > 0).then_some(PrimaryKey::Int(self.id))
    }

    fn set_primary_key(&mut self, key: PrimaryKey) {
        self.id = key.as_int().unwrap_or_default();
    }
}

pub fn person(name: &str, age: i64) -> Value {
    json!({"name": name, "age": age})
}

/// Engine over a fresh in-memory SQLite database and in-process cache.
/// The cache handle is returned so tests can inspect or corrupt it.
pub async fn memory_engine() -> (CrudEngine, Arc<InMemoryStore>) {
    let durable = SqlStore::new("sqlite::memory:").await.expect("sqlite");
    let cache = Arc::new(InMemoryStore::new());
    let engine = engine_over(Arc::new(durable), Some(cache.clone()));
    (engine, cache)
}

pub fn engine_over(
    durable: Arc<dyn DurableStore>,
    cache: Option<Arc<dyn CacheStore>>,
) -> CrudEngine {
    CrudEngine::new(durable, cache, CrudEngineConfig::default())
}

/// Thomas (28), Alan (30), Jason (22), Ben (40): keys 1 to 4.
pub async fn seed_people(engine: &CrudEngine) {
    for (name, age) in [("Thomas", 28), ("Alan", 30), ("Jason", 22), ("Ben", 40)] {
        let _: User = engine.create(&person(name, age)).await.expect("seed");
    }
}
