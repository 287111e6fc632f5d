// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Principals and the session context they are resolved from.
//!
//! Issuing sessions (login, cookies, password checks) belongs to the
//! transport. The engine only asks a [`SessionContext`] for the current
//! principal, and only when a permission actually needs matching.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Failure to resolve the current principal. Distinct from a permission
/// denial.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session backend error: {0}")]
    Backend(String),
    #[error("invalid session data: {0}")]
    Invalid(String),
}

/// An authenticated actor and the roles it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            roles: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Exact membership test against a permission's role list. Stops at the
    /// first match.
    #[must_use]
    pub fn holds_any(&self, allowed: &[String]) -> bool {
        allowed.iter().any(|role| self.roles.contains(role.as_str()))
    }
}

/// Source of the principal behind the current request.
#[async_trait]
pub trait SessionContext: Send + Sync {
    /// `Ok(None)` means the request is anonymous.
    async fn current_principal(&self) -> Result<Option<Principal>, SessionError>;
}

#[async_trait]
impl SessionContext for Principal {
    async fn current_principal(&self) -> Result<Option<Principal>, SessionError> {
        Ok(Some(self.clone()))
    }
}

#[async_trait]
impl SessionContext for Option<Principal> {
    async fn current_principal(&self) -> Result<Option<Principal>, SessionError> {
        Ok(self.clone())
    }
}

/// Session context of an unauthenticated request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl SessionContext for Anonymous {
    async fn current_principal(&self) -> Result<Option<Principal>, SessionError> {
        Ok(None)
    }
}

/// Resolves the wrapped context at most once, for operations that check many
/// records against the same request.
pub(crate) struct MemoizedSession<'a> {
    inner: &'a dyn SessionContext,
    principal: OnceCell<Option<Principal>>,
}

impl<'a> MemoizedSession<'a> {
    pub(crate) fn new(inner: &'a dyn SessionContext) -> Self {
        Self {
            inner,
            principal: OnceCell::new(),
        }
    }
}

#[async_trait]
impl SessionContext for MemoizedSession<'_> {
    async fn current_principal(&self) -> Result<Option<Principal>, SessionError> {
        self.principal
            .get_or_try_init(|| self.inner.current_principal())
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSession {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionContext for CountingSession {
        async fn current_principal(&self) -> Result<Option<Principal>, SessionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Principal::new("u1").with_role("reader")))
        }
    }

    #[test]
    fn test_holds_any_is_exact_membership() {
        let p = Principal::new("u1").with_roles(["admin", "testuser:1"]);
        assert!(p.holds_any(&["ceo".to_string(), "admin".to_string()]));
        assert!(!p.holds_any(&["Admin".to_string()]));
        assert!(!p.holds_any(&["adm*".to_string()]));
        assert!(!p.holds_any(&[]));
    }

    #[tokio::test]
    async fn test_builtin_contexts() {
        assert_eq!(Anonymous.current_principal().await.unwrap(), None);

        let p = Principal::new("u2").with_role("admin");
        assert_eq!(p.current_principal().await.unwrap(), Some(p.clone()));

        let none: Option<Principal> = None;
        assert_eq!(none.current_principal().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memoized_session_resolves_once() {
        let inner = CountingSession {
            calls: AtomicUsize::new(0),
        };
        let memo = MemoizedSession::new(&inner);

        for _ in 0..5 {
            let p = memo.current_principal().await.unwrap().unwrap();
            assert!(p.has_role("reader"));
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_principal_deserializes_without_id() {
        let p: Principal = serde_json::from_str(r#"{"roles":["admin"]}"#).unwrap();
        assert!(p.id.is_none());
        assert!(p.has_role("admin"));
    }
}
