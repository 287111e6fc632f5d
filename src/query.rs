// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query compiler.
//!
//! Turns an untrusted [`QueryParams`] document into a parameterized
//! statement over the JSON payload column of the records table.
//!
//! Only two kinds of text are ever interpolated into the statement:
//! operator tokens from a fixed whitelist, and column names that exist on
//! the target [`RecordSchema`] (which are themselves checked to be plain
//! identifiers). Every value is a bound parameter.
//!
//! # Request shape
//!
//! ```json
//! {
//!   "where":   [{"key": "name", "op": "=", "val": "Thomas",
//!                "or": [{"key": "name", "op": "=", "val": "Alan"}]},
//!               {"key": "age", "op": ">", "val": 29}],
//!   "order":   {"age": false},
//!   "limit":   10,
//!   "include": ["author"]
//! }
//! ```
//!
//! compiles (SQLite dialect) to
//!
//! ```sql
//! SELECT payload FROM crud_records WHERE collection = ?
//!   AND (json_extract(payload, '$.name') = ? OR json_extract(payload, '$.name') = ?)
//!   AND (json_extract(payload, '$.age') > ?)
//!   ORDER BY json_extract(payload, '$.age') DESC, seq ASC, id ASC LIMIT ?
//! ```

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::{RecordSchema, Relation};

/// Table holding every collection's documents.
pub const RECORDS_TABLE: &str = "crud_records";

/// Column holding the JSON document.
pub const PAYLOAD_COLUMN: &str = "payload";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("invalid operator: {0}")]
    InvalidOperator(String),
    #[error("column '{column}' does not exist on '{collection}'")]
    UnknownColumn { collection: String, column: String },
    #[error("'{relation}' is not a relation of '{collection}'")]
    UnknownRelation { collection: String, relation: String },
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Whitelisted comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Ne,
    In,
    Like,
}

impl Operator {
    pub const ALL: [Operator; 8] = [
        Operator::Eq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Ne,
        Operator::In,
        Operator::Like,
    ];

    /// Exact, case-sensitive match against the whitelist.
    pub fn parse(token: &str) -> Result<Self, QueryError> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == token)
            .ok_or_else(|| QueryError::InvalidOperator(token.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Ne => "<>",
            Operator::In => "in",
            Operator::Like => "like",
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Operator::In => "IN",
            Operator::Like => "LIKE",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One filter predicate. `or` items are OR-ed with this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryItem {
    pub key: String,
    pub op: String,
    #[serde(default)]
    pub val: Value,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<QueryItem>,
}

impl QueryItem {
    pub fn new(key: impl Into<String>, op: impl Into<String>, val: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            op: op.into(),
            val: val.into(),
            or: Vec::new(),
        }
    }

    #[must_use]
    pub fn or(mut self, item: QueryItem) -> Self {
        self.or.push(item);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl Serialize for SortDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(matches!(self, SortDirection::Asc))
    }
}

impl<'de> Deserialize<'de> for SortDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DirectionVisitor;

        impl<'de> Visitor<'de> for DirectionVisitor {
            type Value = SortDirection;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean or \"asc\"/\"desc\"")
            }

            fn visit_bool<E: de::Error>(self, ascending: bool) -> Result<SortDirection, E> {
                Ok(if ascending {
                    SortDirection::Asc
                } else {
                    SortDirection::Desc
                })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SortDirection, E> {
                if v.eq_ignore_ascii_case("asc") {
                    Ok(SortDirection::Asc)
                } else if v.eq_ignore_ascii_case("desc") {
                    Ok(SortDirection::Desc)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(DirectionVisitor)
    }
}

/// Sort columns in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBy(pub Vec<(String, SortDirection)>);

impl OrderBy {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for OrderBy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, direction) in &self.0 {
            map.serialize_entry(column, direction)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OrderBy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderVisitor;

        impl<'de> Visitor<'de> for OrderVisitor {
            type Value = OrderBy;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column to sort direction")
            }

            fn visit_unit<E: de::Error>(self) -> Result<OrderBy, E> {
                Ok(OrderBy::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<OrderBy, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((column, direction)) =
                    access.next_entry::<String, SortDirection>()?
                {
                    entries.push((column, direction));
                }
                Ok(OrderBy(entries))
            }
        }

        deserializer.deserialize_any(OrderVisitor)
    }
}

/// Structured query request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(rename = "where", default, deserialize_with = "nullable")]
    pub filters: Vec<QueryItem>,
    #[serde(default, deserialize_with = "nullable")]
    pub limit: i64,
    #[serde(default)]
    pub order: OrderBy,
    #[serde(default, deserialize_with = "nullable")]
    pub include: Vec<String>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, item: QueryItem) -> Self {
        self.filters.push(item);
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order.0.push((column.into(), direction));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.include.push(relation.into());
        self
    }
}

/// JSON `null` decodes to the default value.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// SQL flavour the compiled text targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Sqlite,
    MySql,
}

impl Dialect {
    /// Pick the dialect from a connection URL.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            Dialect::MySql
        } else {
            Dialect::Sqlite
        }
    }

    /// Accessor for one document field. MySQL text comparisons need the
    /// unquoted form; numbers and booleans compare on the JSON value.
    fn field(&self, column: &str, textual: bool) -> String {
        match self {
            Dialect::Sqlite => format!("json_extract({}, '$.{}')", PAYLOAD_COLUMN, column),
            Dialect::MySql if textual => format!(
                "JSON_UNQUOTE(JSON_EXTRACT({}, '$.{}'))",
                PAYLOAD_COLUMN, column
            ),
            Dialect::MySql => format!("JSON_EXTRACT({}, '$.{}')", PAYLOAD_COLUMN, column),
        }
    }
}

/// Bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

impl SqlParam {
    /// `None` for arrays and objects, which never bind as a scalar.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(SqlParam::Null),
            Value::Bool(b) => Some(SqlParam::Boolean(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => SqlParam::Integer(i),
                None => SqlParam::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(s) => Some(SqlParam::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    fn is_textual(&self) -> bool {
        matches!(self, SqlParam::Text(_))
    }

    fn literal(&self) -> String {
        match self {
            SqlParam::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlParam::Integer(i) => i.to_string(),
            SqlParam::Float(f) => f.to_string(),
            SqlParam::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlParam::Null => "NULL".to_string(),
        }
    }
}

/// A validated statement ready for a [`DurableStore`](crate::storage::traits::DurableStore).
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub collection: &'static str,
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub limit: Option<i64>,
    pub includes: Vec<&'static Relation>,
}

impl CompiledQuery {
    /// Statement with every parameter inlined as a literal.
    ///
    /// For logs and debugging only. Never execute the result.
    #[must_use]
    pub fn render_inline(&self) -> String {
        let mut params = self.params.iter().peekable();
        let mut out = String::with_capacity(self.sql.len() + 16 * self.params.len());
        for c in self.sql.chars() {
            match params.next_if(|_| c == '?') {
                Some(param) => out.push_str(&param.literal()),
                None => out.push(c),
            }
        }
        out
    }
}

/// Validates and compiles [`QueryParams`] for one dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler {
    dialect: Dialect,
}

impl QueryCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Validate everything first, then build. A query that fails validation
    /// never produces any statement text.
    pub fn compile(
        &self,
        schema: &'static RecordSchema,
        params: &QueryParams,
    ) -> Result<CompiledQuery, QueryError> {
        let mut terms = Vec::with_capacity(params.filters.len());
        for item in &params.filters {
            let mut group = Vec::new();
            flatten_group(item, &mut group);
            let checked = group
                .into_iter()
                .map(|member| check_predicate(schema, member))
                .collect::<Result<Vec<_>, _>>()?;
            terms.push(checked);
        }

        for (column, _) in &params.order.0 {
            check_column(schema, column)?;
        }

        if params.limit < 0 {
            return Err(QueryError::InvalidValue {
                field: "limit".into(),
                reason: format!("must not be negative, got {}", params.limit),
            });
        }

        let includes = params
            .include
            .iter()
            .map(|name| {
                schema.relation(name).ok_or_else(|| QueryError::UnknownRelation {
                    collection: schema.collection.to_string(),
                    relation: name.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut bound = vec![SqlParam::Text(schema.collection.to_string())];
        let mut sql = format!(
            "SELECT {} FROM {} WHERE collection = ?",
            PAYLOAD_COLUMN, RECORDS_TABLE
        );

        for term in terms {
            let parts: Vec<String> = term
                .into_iter()
                .map(|predicate| self.render_predicate(predicate, &mut bound))
                .collect();
            sql.push_str(" AND (");
            sql.push_str(&parts.join(" OR "));
            sql.push(')');
        }

        sql.push_str(" ORDER BY ");
        for (column, direction) in &params.order.0 {
            sql.push_str(&self.dialect.field(column, false));
            sql.push(' ');
            sql.push_str(direction.sql());
            sql.push_str(", ");
        }
        sql.push_str("seq ASC, id ASC");

        let limit = (params.limit != 0).then_some(params.limit);
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            bound.push(SqlParam::Integer(limit));
        }

        Ok(CompiledQuery {
            collection: schema.collection,
            sql,
            params: bound,
            limit,
            includes,
        })
    }

    fn render_predicate(&self, predicate: Predicate<'_>, bound: &mut Vec<SqlParam>) -> String {
        match predicate.values {
            Bind::List(values) if values.is_empty() => "1=0".to_string(),
            Bind::List(values) => {
                let textual = values.first().is_some_and(SqlParam::is_textual);
                let placeholders = vec!["?"; values.len()].join(", ");
                bound.extend(values);
                format!(
                    "{} {} ({})",
                    self.dialect.field(predicate.column, textual),
                    predicate.op.sql(),
                    placeholders
                )
            }
            Bind::Scalar(value) => {
                let field = self.dialect.field(predicate.column, value.is_textual());
                bound.push(value);
                format!("{} {} ?", field, predicate.op.sql())
            }
        }
    }
}

enum Bind {
    Scalar(SqlParam),
    List(Vec<SqlParam>),
}

struct Predicate<'a> {
    column: &'a str,
    op: Operator,
    values: Bind,
}

/// Lift nested or-groups into one flat group headed by `item`.
fn flatten_group<'a>(item: &'a QueryItem, out: &mut Vec<&'a QueryItem>) {
    out.push(item);
    for alternative in &item.or {
        flatten_group(alternative, out);
    }
}

fn check_column(schema: &RecordSchema, column: &str) -> Result<(), QueryError> {
    if schema.has_column(column) {
        Ok(())
    } else {
        Err(QueryError::UnknownColumn {
            collection: schema.collection.to_string(),
            column: column.to_string(),
        })
    }
}

fn check_predicate<'a>(
    schema: &RecordSchema,
    item: &'a QueryItem,
) -> Result<Predicate<'a>, QueryError> {
    let op = Operator::parse(&item.op)?;
    check_column(schema, &item.key)?;

    let values = match (op, &item.val) {
        (Operator::In, Value::Array(elements)) => {
            let list = elements
                .iter()
                .map(|element| {
                    SqlParam::from_json(element).ok_or_else(|| QueryError::InvalidValue {
                        field: item.key.clone(),
                        reason: "'in' list elements must be scalars".into(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Bind::List(list)
        }
        (Operator::In, _) => {
            return Err(QueryError::InvalidValue {
                field: item.key.clone(),
                reason: "'in' expects an array".into(),
            })
        }
        (_, value) => Bind::Scalar(SqlParam::from_json(value).ok_or_else(|| {
            QueryError::InvalidValue {
                field: item.key.clone(),
                reason: format!("'{}' expects a scalar", op),
            }
        })?),
    };

    Ok(Predicate {
        column: &item.key,
        op,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::KeyKind;
    use serde_json::json;

    static USERS: RecordSchema =
        RecordSchema::new("users", "id", KeyKind::Integer, &["id", "name", "age"]);
    static POST_RELATIONS: [Relation; 1] = [Relation::belongs_to("author", "author_id", users)];
    static POSTS: RecordSchema =
        RecordSchema::new("posts", "id", KeyKind::Integer, &["id", "title", "author_id"])
            .with_relations(&POST_RELATIONS);

    fn users() -> &'static RecordSchema {
        &USERS
    }

    fn compile(params: &QueryParams) -> Result<CompiledQuery, QueryError> {
        QueryCompiler::new(Dialect::Sqlite).compile(&USERS, params)
    }

    #[test]
    fn test_empty_where_is_unfiltered() {
        let q = compile(&QueryParams::new()).unwrap();
        assert_eq!(
            q.sql,
            "SELECT payload FROM crud_records WHERE collection = ? ORDER BY seq ASC, id ASC"
        );
        assert_eq!(q.params, vec![SqlParam::Text("users".into())]);
        assert_eq!(q.limit, None);
    }

    #[test]
    fn test_single_equality() {
        let q = compile(&QueryParams::new().filter(QueryItem::new("name", "=", "Thomas"))).unwrap();
        assert_eq!(
            q.sql,
            "SELECT payload FROM crud_records WHERE collection = ? \
             AND (json_extract(payload, '$.name') = ?) ORDER BY seq ASC, id ASC"
        );
        assert_eq!(q.params[1], SqlParam::Text("Thomas".into()));
    }

    #[test]
    fn test_or_group_shares_one_term() {
        let params = QueryParams::new()
            .filter(QueryItem::new("name", "=", "Thomas").or(QueryItem::new("name", "=", "Alan")))
            .filter(QueryItem::new("age", ">", 29));
        let q = compile(&params).unwrap();
        assert!(q.sql.contains(
            "AND (json_extract(payload, '$.name') = ? OR json_extract(payload, '$.name') = ?) \
             AND (json_extract(payload, '$.age') > ?)"
        ));
        assert_eq!(
            q.params,
            vec![
                SqlParam::Text("users".into()),
                SqlParam::Text("Thomas".into()),
                SqlParam::Text("Alan".into()),
                SqlParam::Integer(29),
            ]
        );
    }

    #[test]
    fn test_nested_or_is_flattened() {
        let item = QueryItem::new("name", "=", "A")
            .or(QueryItem::new("name", "=", "B").or(QueryItem::new("name", "=", "C")));
        let q = compile(&QueryParams::new().filter(item)).unwrap();
        assert_eq!(q.sql.matches(" OR ").count(), 2);
        assert_eq!(q.sql.matches('(').count(), q.sql.matches(')').count());
        assert_eq!(q.params.len(), 4);
    }

    #[test]
    fn test_in_list_and_empty_in() {
        let q = compile(&QueryParams::new().filter(QueryItem::new("age", "in", json!([22, 40]))))
            .unwrap();
        assert!(q.sql.contains("json_extract(payload, '$.age') IN (?, ?)"));
        assert_eq!(&q.params[1..], &[SqlParam::Integer(22), SqlParam::Integer(40)]);

        let q = compile(&QueryParams::new().filter(QueryItem::new("age", "in", json!([])))).unwrap();
        assert!(q.sql.contains("AND (1=0)"));
        assert_eq!(q.params.len(), 1);
    }

    #[test]
    fn test_rejects_hostile_operator() {
        let err = compile(&QueryParams::new().filter(QueryItem::new("name", "DROP TABLE", "x")))
            .unwrap_err();
        assert_eq!(err, QueryError::InvalidOperator("DROP TABLE".into()));

        // Hidden inside an or-group.
        let item = QueryItem::new("name", "=", "x").or(QueryItem::new("name", "; --", "y"));
        assert!(matches!(
            compile(&QueryParams::new().filter(item)),
            Err(QueryError::InvalidOperator(_))
        ));

        // Case matters.
        assert!(matches!(
            compile(&QueryParams::new().filter(QueryItem::new("name", "LIKE", "x"))),
            Err(QueryError::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_column() {
        let err = compile(&QueryParams::new().filter(QueryItem::new("nonexistent_column", "=", 1)))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { ref column, .. } if column == "nonexistent_column"));

        let err = compile(&QueryParams::new().order_by("password", SortDirection::Asc)).unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { .. }));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            compile(&QueryParams::new().filter(QueryItem::new("age", "in", 3))),
            Err(QueryError::InvalidValue { .. })
        ));
        assert!(matches!(
            compile(&QueryParams::new().filter(QueryItem::new("age", "=", json!([1])))),
            Err(QueryError::InvalidValue { .. })
        ));
        assert!(matches!(
            compile(&QueryParams::new().filter(QueryItem::new("age", "in", json!([[1]])))),
            Err(QueryError::InvalidValue { .. })
        ));
        assert!(matches!(
            compile(&QueryParams::new().limit(-1)),
            Err(QueryError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_order_and_limit() {
        let params = QueryParams::new()
            .order_by("age", SortDirection::Desc)
            .order_by("name", SortDirection::Asc)
            .limit(2);
        let q = compile(&params).unwrap();
        assert!(q.sql.ends_with(
            "ORDER BY json_extract(payload, '$.age') DESC, \
             json_extract(payload, '$.name') ASC, seq ASC, id ASC LIMIT ?"
        ));
        assert_eq!(q.params.last(), Some(&SqlParam::Integer(2)));
        assert_eq!(q.limit, Some(2));
    }

    #[test]
    fn test_include_must_be_declared() {
        let compiler = QueryCompiler::default();
        let q = compiler
            .compile(&POSTS, &QueryParams::new().include("author"))
            .unwrap();
        assert_eq!(q.includes.len(), 1);
        assert_eq!(q.includes[0].local_key, "author_id");

        let err = compiler
            .compile(&POSTS, &QueryParams::new().include("comments"))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownRelation { .. }));
    }

    #[test]
    fn test_mysql_accessors() {
        let params = QueryParams::new()
            .filter(QueryItem::new("name", "like", "Tho%"))
            .filter(QueryItem::new("age", ">=", 30));
        let q = QueryCompiler::new(Dialect::MySql).compile(&USERS, &params).unwrap();
        assert!(q.sql.contains("JSON_UNQUOTE(JSON_EXTRACT(payload, '$.name')) LIKE ?"));
        assert!(q.sql.contains("JSON_EXTRACT(payload, '$.age') >= ?"));
    }

    #[test]
    fn test_render_inline_escapes_literals() {
        let params = QueryParams::new().filter(QueryItem::new("name", "=", "O'Brien?"));
        let q = compile(&params).unwrap();
        assert_eq!(
            q.render_inline(),
            "SELECT payload FROM crud_records WHERE collection = 'users' \
             AND (json_extract(payload, '$.name') = 'O''Brien?') ORDER BY seq ASC, id ASC"
        );
    }

    #[test]
    fn test_values_never_reach_statement_text() {
        let hostile = "x'); DELETE FROM crud_records; --";
        let q = compile(&QueryParams::new().filter(QueryItem::new("name", "=", hostile))).unwrap();
        assert!(!q.sql.contains(hostile));
    }

    #[test]
    fn test_decode_request_body() {
        let params: QueryParams = serde_json::from_str(
            r#"{"where":[{"key":"name","op":"=","val":"Thomas","or":[{"key":"name","op":"=","val":"Alan"}]}],
                "order":{"name":true,"age":"desc"},"limit":1,"include":null}"#,
        )
        .unwrap();
        assert_eq!(params.filters.len(), 1);
        assert_eq!(params.filters[0].or.len(), 1);
        assert_eq!(
            params.order.0,
            vec![
                ("name".to_string(), SortDirection::Asc),
                ("age".to_string(), SortDirection::Desc)
            ]
        );
        assert_eq!(params.limit, 1);
        assert!(params.include.is_empty());

        let empty: QueryParams = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, QueryParams::default());

        assert!(serde_json::from_str::<QueryParams>(r#"{"order":{"name":"sideways"}}"#).is_err());
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("mysql://root@localhost/db"), Dialect::MySql);
        assert_eq!(Dialect::from_url("sqlite::memory:"), Dialect::Sqlite);
    }
}
