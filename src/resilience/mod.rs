//! Retry and circuit breaking for the store clients.

pub mod circuit_breaker;
pub mod retry;
