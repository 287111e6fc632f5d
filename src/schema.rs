// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record schema descriptors and storage identity.
//!
//! Every resource type handled by the engine implements [`Record`] and hands
//! out a static [`RecordSchema`]. The schema is the closed set of identifiers
//! the rest of the crate trusts: the query compiler only ever interpolates
//! column names found here, and the stores derive keys from it.
//!
//! # Example
//!
//! ```
//! use crud_engine::schema::{identity, KeyKind, PrimaryKey, Record, RecordSchema};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     #[serde(default)]
//!     id: i64,
//!     name: String,
//!     age: i64,
//! }
//!
//! static USER_SCHEMA: RecordSchema =
//!     RecordSchema::new("users", "id", KeyKind::Integer, &["id", "name", "age"]);
//!
//! impl Record for User {
//!     fn schema() -> &'static RecordSchema {
//!         &USER_SCHEMA
//!     }
//!
//!     fn primary_key(&self) -> Option<PrimaryKey> {
//!         (self.id > 0).then(|| PrimaryKey::Int(self.id))
//!     }
//!
//!     fn set_primary_key(&mut self, key: PrimaryKey) {
//!         if let PrimaryKey::Int(id) = key {
//!             self.id = id;
//!         }
//!     }
//! }
//!
//! let user = User { id: 7, name: "Thomas".into(), age: 28 };
//! let id = identity(&user).unwrap();
//! assert_eq!(id.cache_key(), "users:7");
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ValidationError;
use crate::permission::{document_read_roles, Authorizer};
use crate::revision::Revisioned;
use crate::storage::traits::StorageError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Record in '{collection}' does not expose a primary key")]
    MissingPrimaryKey { collection: &'static str },
    #[error("Primary key column '{column}' is not a column of '{collection}'")]
    UnknownKeyColumn {
        collection: &'static str,
        column: &'static str,
    },
    #[error("Column '{column}' is declared twice on '{collection}'")]
    DuplicateColumn {
        collection: &'static str,
        column: &'static str,
    },
    #[error("Relation '{relation}' uses '{column}', which is not a column of '{collection}'")]
    UnknownRelationKey {
        collection: &'static str,
        relation: &'static str,
        column: &'static str,
    },
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(&'static str),
}

/// How raw identifiers are parsed for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Integer,
    Text,
}

/// Primary key value of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Text(String),
}

impl PrimaryKey {
    /// Parse an identifier taken from a request path.
    pub fn parse(raw: &str, kind: KeyKind) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingId);
        }
        match kind {
            KeyKind::Integer => raw
                .parse::<i64>()
                .map(PrimaryKey::Int)
                .map_err(|_| ValidationError::InvalidId(raw.to_string())),
            KeyKind::Text => Ok(PrimaryKey::Text(raw.to_string())),
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PrimaryKey::Int(id) => Some(*id),
            PrimaryKey::Text(_) => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Int(id) => Value::from(*id),
            PrimaryKey::Text(id) => Value::String(id.clone()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Int(id) => write!(f, "{}", id),
            PrimaryKey::Text(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(id: i64) -> Self {
        PrimaryKey::Int(id)
    }
}

impl From<&str> for PrimaryKey {
    fn from(id: &str) -> Self {
        PrimaryKey::Text(id.to_string())
    }
}

/// A belongs-to relation that queries may eager-load with `include`.
///
/// The related record is looked up by the value of `local_key` and embedded
/// into the result document under `name`. `read_roles` authorizes the raw
/// related document: `None` is public, otherwise the caller must hold one of
/// the returned roles or `null` is embedded instead.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub name: &'static str,
    pub local_key: &'static str,
    pub target: fn() -> &'static RecordSchema,
    pub read_roles: fn(&Value) -> Option<Vec<String>>,
}

impl Relation {
    /// Relation whose target stores its [`Permission`](crate::Permission)
    /// under `permission`.
    pub const fn belongs_to(
        name: &'static str,
        local_key: &'static str,
        target: fn() -> &'static RecordSchema,
    ) -> Self {
        Self {
            name,
            local_key,
            target,
            read_roles: document_read_roles,
        }
    }

    /// Override how the related document is authorized.
    pub const fn with_read_roles(self, read_roles: fn(&Value) -> Option<Vec<String>>) -> Self {
        Self { read_roles, ..self }
    }
}

/// Static storage description of one record type.
#[derive(Debug)]
pub struct RecordSchema {
    pub collection: &'static str,
    pub primary_key: &'static str,
    pub key_kind: KeyKind,
    pub columns: &'static [&'static str],
    pub relations: &'static [Relation],
}

impl RecordSchema {
    pub const fn new(
        collection: &'static str,
        primary_key: &'static str,
        key_kind: KeyKind,
        columns: &'static [&'static str],
    ) -> Self {
        Self {
            collection,
            primary_key,
            key_kind,
            columns,
            relations: &[],
        }
    }

    pub const fn with_relations(self, relations: &'static [Relation]) -> Self {
        Self { relations, ..self }
    }

    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| *c == column)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Check the descriptor is self-consistent and every identifier is safe
    /// to appear in query text.
    pub fn validate(&self) -> Result<(), SchemaError> {
        check_identifier(self.collection)?;
        for (i, &column) in self.columns.iter().enumerate() {
            check_identifier(column)?;
            if self.columns[..i].contains(&column) {
                return Err(SchemaError::DuplicateColumn {
                    collection: self.collection,
                    column,
                });
            }
        }
        if !self.has_column(self.primary_key) {
            return Err(SchemaError::UnknownKeyColumn {
                collection: self.collection,
                column: self.primary_key,
            });
        }
        for relation in self.relations {
            check_identifier(relation.name)?;
            if !self.has_column(relation.local_key) {
                return Err(SchemaError::UnknownRelationKey {
                    collection: self.collection,
                    relation: relation.name,
                    column: relation.local_key,
                });
            }
        }
        Ok(())
    }
}

fn check_identifier(ident: &'static str) -> Result<(), SchemaError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(ident))
    }
}

/// A resource type the engine can store, cache, authorize and query.
///
/// Revision and permission support are optional capabilities: override
/// [`as_revisioned`](Record::as_revisioned) /
/// [`as_authorizer`](Record::as_authorizer) to opt in. Records that don't are
/// never conflict-checked and are publicly accessible.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn schema() -> &'static RecordSchema;

    /// `None` while the record has not been assigned a key yet.
    fn primary_key(&self) -> Option<PrimaryKey>;

    fn set_primary_key(&mut self, key: PrimaryKey);

    fn as_revisioned(&self) -> Option<&dyn Revisioned> {
        None
    }

    fn as_revisioned_mut(&mut self) -> Option<&mut dyn Revisioned> {
        None
    }

    fn as_authorizer(&self) -> Option<&dyn Authorizer> {
        None
    }
}

/// Storage identity of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub collection: &'static str,
    pub primary_key: PrimaryKey,
}

impl Identity {
    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key(self.collection, &self.primary_key)
    }
}

/// Cache key for a record: `"<collection>:<primaryKey>"`.
#[must_use]
pub fn cache_key(collection: &str, key: &PrimaryKey) -> String {
    format!("{}:{}", collection, key)
}

/// Derive the storage identity of a record.
pub fn identity<R: Record>(record: &R) -> Result<Identity, SchemaError> {
    let schema = R::schema();
    let primary_key = record.primary_key().ok_or(SchemaError::MissingPrimaryKey {
        collection: schema.collection,
    })?;
    Ok(Identity {
        collection: schema.collection,
        primary_key,
    })
}

pub(crate) fn to_document<R: Record>(record: &R) -> Result<Value, StorageError> {
    let doc = serde_json::to_value(record).map_err(|e| StorageError::Codec(e.to_string()))?;
    if doc.is_object() {
        Ok(doc)
    } else {
        Err(StorageError::Codec(format!(
            "record in '{}' does not serialize to an object",
            R::schema().collection
        )))
    }
}

pub(crate) fn from_document<R: Record>(doc: Value) -> Result<R, StorageError> {
    serde_json::from_value(doc).map_err(|e| StorageError::Codec(e.to_string()))
}
