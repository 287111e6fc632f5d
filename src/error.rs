// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy surfaced by the engine and its status-code contract.
//!
//! | Error                     | Status |
//! |---------------------------|--------|
//! | [`CrudError::Validation`] | 400    |
//! | [`CrudError::Unauthorized`] | 403  |
//! | [`CrudError::NotFound`]   | 404    |
//! | [`CrudError::Conflict`]   | 409    |
//! | storage / schema / session | 500   |
//!
//! Cache-tier failures never appear here: the cache-aside store absorbs
//! them and falls through to the durable store.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::query::QueryError;
use crate::schema::SchemaError;
use crate::session::SessionError;
use crate::storage::traits::StorageError;

/// Caller input faults. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("id is required")]
    MissingId,
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Error, Debug)]
pub enum CrudError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("permission denied")]
    Unauthorized,
    /// Carries the unmodified current record so the caller can re-fetch and
    /// retry with a fresh revision.
    #[error("revision conflict")]
    Conflict { current: Value },
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<StorageError> for CrudError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => CrudError::NotFound,
            other => CrudError::Storage(other),
        }
    }
}

impl From<QueryError> for CrudError {
    fn from(err: QueryError) -> Self {
        CrudError::Validation(ValidationError::Query(err))
    }
}

impl CrudError {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            CrudError::Validation(_) => 400,
            CrudError::Unauthorized => 403,
            CrudError::NotFound => 404,
            CrudError::Conflict { .. } => 409,
            CrudError::Storage(_) | CrudError::Schema(_) | CrudError::Session(_) => 500,
        }
    }

    /// The engine never retries on its own; retry policy lives in the store
    /// clients. A conflict is resolved by the caller re-fetching.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CrudError::Validation(_) => "validation",
            CrudError::Unauthorized => "unauthorized",
            CrudError::NotFound => "not_found",
            CrudError::Conflict { .. } => "conflict",
            CrudError::Storage(_) => "storage",
            CrudError::Schema(_) => "schema",
            CrudError::Session(_) => "session",
        }
    }

    /// Response body for this error. A conflict answers with the current
    /// record, everything else with `{"error": ...}`.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            CrudError::Conflict { current } => current.clone(),
            other => json!({ "error": other.to_string() }),
        }
    }
}

/// Map an operation result onto `(status, JSON body)` for the transport.
pub fn respond<T: Serialize>(result: Result<T, CrudError>) -> (u16, Value) {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(body) => (200, body),
            Err(e) => (500, json!({ "error": e.to_string() })),
        },
        Err(err) => (err.status_code(), err.body()),
    }
}
