// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Role-based authorization of single records.
//!
//! | record has a permission? | roles for intent | principal        | result |
//! |--------------------------|------------------|------------------|--------|
//! | no                       | -                | -                | allow  |
//! | yes                      | empty            | any              | deny   |
//! | yes                      | non-empty        | anonymous        | deny   |
//! | yes                      | non-empty        | holds one        | allow  |
//! | yes                      | non-empty        | holds none       | deny   |
//!
//! The session is only consulted in the last three rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::CrudError;
use crate::schema::Record;
use crate::session::SessionContext;

/// What a caller wants to do with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

impl Intent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Read => "read",
            Intent::Write => "write",
        }
    }
}

/// Role lists per intent. Wire form: `{"Read":[...],"Write":[...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(rename = "Read", default)]
    pub read: Vec<String>,
    #[serde(rename = "Write", default)]
    pub write: Vec<String>,
}

impl Permission {
    pub fn new<R, W, S>(read: R, write: W) -> Self
    where
        R: IntoIterator<Item = S>,
        W: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            read: read.into_iter().map(Into::into).collect(),
            write: write.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn roles_for(&self, intent: Intent) -> &[String] {
        match intent {
            Intent::Read => &self.read,
            Intent::Write => &self.write,
        }
    }
}

/// Capability of records that carry a permission descriptor.
pub trait Authorizer: Send + Sync {
    fn permission(&self) -> &Permission;
}

impl Authorizer for Permission {
    fn permission(&self) -> &Permission {
        self
    }
}

/// Decide whether the session's principal may act on `record`.
///
/// A failed principal lookup is returned as [`CrudError::Session`], never as
/// a denial.
pub async fn can_perform<R: Record>(
    record: &R,
    session: &dyn SessionContext,
    intent: Intent,
) -> Result<(), CrudError> {
    let allowed = match record.as_authorizer() {
        None => return Ok(()),
        Some(authorizer) => authorizer.permission().roles_for(intent),
    };
    evaluate(allowed, session, intent).await
}

/// Read roles of a raw record document carrying its descriptor under
/// `permission`. `None` means the document is public.
///
/// An undecodable descriptor yields an empty list, which denies everyone.
pub fn document_read_roles(doc: &Value) -> Option<Vec<String>> {
    let descriptor = doc.get("permission").filter(|p| !p.is_null())?;
    match Permission::deserialize(descriptor) {
        Ok(permission) => Some(permission.read),
        Err(e) => {
            debug!(error = %e, "Undecodable permission descriptor");
            Some(Vec::new())
        }
    }
}

pub(crate) async fn evaluate(
    allowed: &[String],
    session: &dyn SessionContext,
    intent: Intent,
) -> Result<(), CrudError> {
    if allowed.is_empty() {
        debug!(intent = intent.as_str(), "No roles granted for intent");
        return Err(CrudError::Unauthorized);
    }

    let principal = match session.current_principal().await? {
        Some(principal) => principal,
        None => {
            debug!(intent = intent.as_str(), "Anonymous principal denied");
            return Err(CrudError::Unauthorized);
        }
    };

    if principal.holds_any(allowed) {
        Ok(())
    } else {
        debug!(
            intent = intent.as_str(),
            principal = ?principal.id,
            "Principal holds none of the required roles"
        );
        Err(CrudError::Unauthorized)
    }
}
