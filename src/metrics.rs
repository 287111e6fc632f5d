// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for crud-engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `crud_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: read, create, update, delete, query
//! - `status`: success, validation, unauthorized, not_found, conflict, storage
//! - `outcome`: hit, miss, corrupt, write, evict, error, skipped (cache);
//!   success, failure, rejected (circuit)
//! - `stage`: fetched, visible (query rows before and after row-level authorization)

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record a finished engine operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "crud_engine_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "crud_engine_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a cache lookup or write-through outcome
pub fn record_cache(outcome: &str) {
    counter!(
        "crud_engine_cache_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record how many rows a query produced at a given stage
pub fn record_query_rows(stage: &str, count: usize) {
    histogram!(
        "crud_engine_query_rows",
        "stage" => stage.to_string()
    )
    .record(count as f64);
}

/// Record circuit breaker call
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "crud_engine_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
