//! # CRUD Engine
//!
//! A generic request-handling layer between a resource endpoint and a
//! persistent store. Any record type registered through [`Record`] gets the
//! same cross-cutting behavior:
//!
//! - role-based authorization per record instance
//! - cache-aside acceleration with read-repair
//! - optimistic-concurrency conflict detection through revisions
//! - a safe compiler for structured, untrusted query input
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CrudEngine (transport-facing)             │
//! │  • read / create / update / delete / query                 │
//! │  • status-code contract via respond()                      │
//! └─────────────────────────────────────────────────────────────┘
//!        │                 │                    │
//!        ▼                 ▼                    ▼
//!  ┌────────────┐   ┌──────────────┐   ┌─────────────────┐
//!  │ Permission │   │   Revision   │   │  QueryCompiler  │
//!  │ evaluator  │   │   resolver   │   │ (whitelist +    │
//!  │            │   │              │   │  bound params)  │
//!  └────────────┘   └──────────────┘   └─────────────────┘
//!                          │                    │
//!                          ▼                    │
//! ┌─────────────────────────────────────────────┼───────────────┐
//! │                 CacheAside                  │               │
//! │  • Redis / in-process snapshots, breaker    │               │
//! └─────────────────────────────────────────────┼───────────────┘
//!                          │                    │
//!                          ▼                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Durable store: SQLite / MySQL (sqlx)           │
//! │  • ground truth, revision compare-and-swap                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crud_engine::{
//!     respond, CrudEngine, CrudEngineConfig, KeyKind, Permission, Authorizer, PrimaryKey,
//!     Principal, Record, RecordSchema,
//! };
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//!
//! static NOTES: RecordSchema =
//!     RecordSchema::new("notes", "id", KeyKind::Integer, &["id", "text", "permission"]);
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Note {
//!     #[serde(default)]
//!     id: i64,
//!     text: String,
//!     #[serde(default)]
//!     permission: Permission,
//! }
//!
//! impl Record for Note {
//!     fn schema() -> &'static RecordSchema { &NOTES }
//!     fn primary_key(&self) -> Option<PrimaryKey> { (self.id > 0).then_some(PrimaryKey::Int(self.id)) }
//!     fn set_primary_key(&mut self, key: PrimaryKey) { self.id = key.as_int().unwrap_or_default(); }
//!     fn as_authorizer(&self) -> Option<&dyn Authorizer> { Some(&self.permission) }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = CrudEngine::connect(CrudEngineConfig::default())
//!         .await
//!         .expect("Failed to connect");
//!
//!     let body = json!({"text": "hello", "permission": {"Read": ["staff"], "Write": ["staff"]}});
//!     let (status, _) = respond(engine.create::<Note>(&body).await);
//!     assert_eq!(status, 200);
//!
//!     let staff = Principal::new("u-1").with_role("staff");
//!     let (status, body) = respond(engine.read::<Note>("1", &staff).await);
//!     println!("{status}: {body}");
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`CrudEngineConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`engine`]: The [`CrudEngine`] composing every operation
//! - [`cache_aside`]: Cache-aside store over the durable and cache tiers
//! - [`query`]: Structured query params and the SQL compiler
//! - [`permission`]: Role lists and the permission evaluator
//! - [`revision`]: Revision markers, conflict checks and merge
//! - [`schema`]: Record schemas, identities and cache keys
//! - [`session`]: Principals and the session context seam
//! - [`storage`]: Storage backends (SQL, Redis, Memory)
//! - [`resilience`]: Circuit breaker and retry logic

pub mod cache_aside;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod permission;
pub mod query;
pub mod resilience;
pub mod revision;
pub mod schema;
pub mod session;
pub mod storage;

pub use cache_aside::CacheAside;
pub use config::CrudEngineConfig;
pub use engine::CrudEngine;
pub use error::{respond, CrudError, ValidationError};
pub use permission::{can_perform, Authorizer, Intent, Permission};
pub use query::{CompiledQuery, Dialect, Operator, OrderBy, QueryCompiler, QueryError, QueryItem, QueryParams, SortDirection};
pub use revision::{check_conflict, Revisioned};
pub use schema::{cache_key, identity, Identity, KeyKind, PrimaryKey, Record, RecordSchema, Relation, SchemaError};
pub use session::{Anonymous, Principal, SessionContext, SessionError};
pub use storage::traits::{CacheStore, DurableStore, StorageError};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
