// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Optimistic concurrency through per-record revision counters.
//!
//! A revision detects a lost update, it does not prevent one. The durable
//! store enforces the actual compare-and-swap when the merged record is
//! persisted (see `CacheAside::save_guarded`).

use serde_json::Value;

use crate::error::{CrudError, ValidationError};
use crate::schema::{from_document, to_document, Record};

/// Revision a freshly created record starts at.
pub const INITIAL_REVISION: i64 = 1;

/// Capability of records that carry a monotonic revision marker.
///
/// Records that keep a textual revision convert it in these accessors:
///
/// ```
/// use crud_engine::Revisioned;
///
/// struct Page {
///     revision: String,
/// }
///
/// impl Revisioned for Page {
///     fn current_revision(&self) -> i64 {
///         self.revision.parse().unwrap_or_default()
///     }
///
///     fn set_revision(&mut self, revision: i64) {
///         self.revision = revision.to_string();
///     }
/// }
///
/// let mut page = Page { revision: "41".into() };
/// page.set_next_revision();
/// assert_eq!(page.revision, "42");
/// ```
pub trait Revisioned: Send + Sync {
    fn current_revision(&self) -> i64;

    fn set_revision(&mut self, revision: i64);

    /// Advance by one. Saturates at `i64::MAX`.
    fn set_next_revision(&mut self) {
        let next = self.current_revision().saturating_add(1);
        self.set_revision(next);
    }
}

/// Revision of `record`, if its type tracks one.
pub fn revision_of<R: Record>(record: &R) -> Option<i64> {
    record.as_revisioned().map(|r| r.current_revision())
}

/// `true` when `incoming` may be merged onto `current`.
///
/// Only compares when both sides expose a revision.
pub fn check_conflict<R: Record>(current: &R, incoming: &R) -> bool {
    match (revision_of(current), revision_of(incoming)) {
        (Some(stored), Some(requested)) => stored == requested,
        _ => true,
    }
}

pub(crate) fn stamp_initial<R: Record>(record: &mut R) {
    if let Some(revisioned) = record.as_revisioned_mut() {
        revisioned.set_revision(INITIAL_REVISION);
    }
}

/// Overlay the fields present in `body` onto `current`, keep its identity and
/// advance the revision by one.
pub(crate) fn merge<R: Record>(current: &R, body: &Value) -> Result<R, CrudError> {
    let patch = body
        .as_object()
        .ok_or_else(|| ValidationError::MalformedBody("update body must be an object".into()))?;

    let mut doc = to_document(current)?;
    if let Value::Object(fields) = &mut doc {
        let key_column = R::schema().primary_key;
        for (field, value) in patch {
            if field != key_column {
                fields.insert(field.clone(), value.clone());
            }
        }
    }

    let mut merged: R = from_document(doc)
        .map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
    if let Some(key) = current.primary_key() {
        merged.set_primary_key(key);
    }
    if let (Some(stored), Some(revisioned)) = (revision_of(current), merged.as_revisioned_mut()) {
        revisioned.set_revision(stored);
        revisioned.set_next_revision();
    }
    Ok(merged)
}
