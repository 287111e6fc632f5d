//! Storage capabilities and their implementations.
//!
//! - [`traits`]: the [`DurableStore`](traits::DurableStore) and
//!   [`CacheStore`](traits::CacheStore) capabilities
//! - [`sql`]: durable store over SQLite / MySQL
//! - [`redis`]: cache over Redis
//! - [`memory`]: in-process cache

pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;
