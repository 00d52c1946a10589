//! Structured statements: literal SQL fragments interleaved with typed slots.
//!
//! A [`Statement`] never holds untrusted text in its fragments unless the caller
//! goes through [`Statement::unsafe_raw`]. Everything else travels as a bound
//! parameter or a quoted identifier once compiled.

use serde_json::Value as JsonValue;

use crate::error::SqlGateError;
use crate::types::RowValues;

mod compiler;

pub use compiler::{CompiledQuery, PlaceholderStyle, StatementCompiler};

/// A typed hole between two literal fragments.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// A scalar bound as one parameter.
    Param(RowValues),
    /// A quoted identifier.
    Identifier(Ident),
    /// A JSON document bound as one parameter.
    Json(JsonValue),
    /// A parenthesized list of parameters, e.g. for `IN`.
    List(Vec<RowValues>),
    /// `(cols) VALUES (...), (...)`
    Insert(InsertRows),
    /// `col = CASE ... END, ... WHERE key IN (...)`
    BulkUpdate(BulkUpdate),
    /// `col = ?, col = ?`
    Record(RecordUpdate),
    /// Text spliced verbatim. Injection safety is the caller's responsibility.
    Raw(String),
}

/// Literal fragments plus slots; always `fragments.len() == slots.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    fragments: Vec<String>,
    slots: Vec<Slot>,
}

impl Statement {
    /// Start a statement with a literal SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            fragments: vec![sql.into()],
            slots: Vec::new(),
        }
    }

    /// Build from explicit parts.
    ///
    /// # Errors
    /// Returns [`SqlGateError::StatementCompilation`] unless there is exactly one more
    /// fragment than slots.
    pub fn from_parts(fragments: Vec<String>, slots: Vec<Slot>) -> Result<Self, SqlGateError> {
        if fragments.len() != slots.len() + 1 {
            return Err(SqlGateError::compilation(
                format!(
                    "statement has {} fragments for {} slots; expected {}",
                    fragments.len(),
                    slots.len(),
                    slots.len() + 1
                ),
                None,
            ));
        }
        Ok(Self { fragments, slots })
    }

    #[must_use]
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Append literal SQL to the trailing fragment.
    #[must_use]
    pub fn push_sql(mut self, sql: &str) -> Self {
        self.tail().push_str(sql);
        self
    }

    /// Append a slot followed by an empty fragment.
    #[must_use]
    pub fn push_slot(mut self, slot: Slot) -> Self {
        self.slots.push(slot);
        self.fragments.push(String::new());
        self
    }

    #[must_use]
    pub fn bind(self, value: impl Into<RowValues>) -> Self {
        self.push_slot(Slot::Param(value.into()))
    }

    #[must_use]
    pub fn ident(self, ident: impl Into<Ident>) -> Self {
        self.push_slot(Slot::Identifier(ident.into()))
    }

    #[must_use]
    pub fn json(self, value: JsonValue) -> Self {
        self.push_slot(Slot::Json(value))
    }

    #[must_use]
    pub fn list<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<RowValues>,
    {
        self.push_slot(Slot::List(values.into_iter().map(Into::into).collect()))
    }

    #[must_use]
    pub fn insert(self, rows: InsertRows) -> Self {
        self.push_slot(Slot::Insert(rows))
    }

    #[must_use]
    pub fn update_many(self, update: BulkUpdate) -> Self {
        self.push_slot(Slot::BulkUpdate(update))
    }

    #[must_use]
    pub fn update(self, record: RecordUpdate) -> Self {
        self.push_slot(Slot::Record(record))
    }

    /// Splice `sql` verbatim into the statement text.
    #[must_use]
    pub fn unsafe_raw(self, sql: impl Into<String>) -> Self {
        self.push_slot(Slot::Raw(sql.into()))
    }

    /// Splice another statement onto the end of this one.
    #[must_use]
    pub fn append(mut self, other: Statement) -> Self {
        let mut fragments = other.fragments.into_iter();
        if let Some(head) = fragments.next() {
            self.tail().push_str(&head);
        }
        self.slots.extend(other.slots);
        self.fragments.extend(fragments);
        self
    }

    /// Parenthesized parts joined by `AND`; `1=1` when empty.
    pub fn and(parts: impl IntoIterator<Item = Statement>) -> Statement {
        Self::join_clauses(parts, " AND ", "1=1")
    }

    /// Parenthesized parts joined by `OR`; `1=0` when empty.
    pub fn or(parts: impl IntoIterator<Item = Statement>) -> Statement {
        Self::join_clauses(parts, " OR ", "1=0")
    }

    /// Parts joined by `, `.
    pub fn csv(parts: impl IntoIterator<Item = Statement>) -> Statement {
        let mut out: Option<Statement> = None;
        for part in parts {
            out = Some(match out {
                None => part,
                Some(acc) => acc.push_sql(", ").append(part),
            });
        }
        out.unwrap_or_else(|| Statement::new(""))
    }

    fn join_clauses(
        parts: impl IntoIterator<Item = Statement>,
        separator: &str,
        empty: &str,
    ) -> Statement {
        let mut out: Option<Statement> = None;
        for part in parts {
            let wrapped = Statement::new("(").append(part).push_sql(")");
            out = Some(match out {
                None => wrapped,
                Some(acc) => acc.push_sql(separator).append(wrapped),
            });
        }
        out.unwrap_or_else(|| Statement::new(empty))
    }

    fn tail(&mut self) -> &mut String {
        if self.fragments.is_empty() {
            self.fragments.push(String::new());
        }
        let last = self.fragments.len() - 1;
        &mut self.fragments[last]
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

/// An identifier, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub(crate) parts: Vec<String>,
    pub(crate) transform: bool,
}

impl Ident {
    /// Identifier subject to the client's name transform.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            parts: vec![name.into()],
            transform: true,
        }
    }

    /// Identifier quoted exactly as given, bypassing the name transform.
    pub fn verbatim(name: impl Into<String>) -> Self {
        Self {
            parts: vec![name.into()],
            transform: false,
        }
    }

    /// `schema.table` style name; each part is quoted on its own.
    pub fn qualified<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
            transform: true,
        }
    }
}

impl From<&str> for Ident {
    fn from(name: &str) -> Self {
        Ident::new(name)
    }
}

impl From<String> for Ident {
    fn from(name: String) -> Self {
        Ident::new(name)
    }
}

/// Rows for a multi-row insert. Each row is positional against `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RowValues>>,
    pub returning: Option<String>,
}

impl InsertRows {
    pub fn new<C, S>(columns: C, rows: Vec<Vec<RowValues>>) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
            returning: None,
        }
    }

    /// Build rows from JSON objects, taking the column order from the first record.
    ///
    /// Keys missing from later records bind NULL.
    ///
    /// # Errors
    /// Returns [`SqlGateError::StatementCompilation`] if any record is not a JSON object.
    pub fn from_records(records: &[JsonValue]) -> Result<Self, SqlGateError> {
        let columns: Vec<String> = match records.first() {
            Some(JsonValue::Object(first)) => first.keys().cloned().collect(),
            Some(_) => {
                return Err(SqlGateError::compilation("record 0 is not a JSON object", None));
            }
            None => Vec::new(),
        };
        let mut rows = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            let JsonValue::Object(map) = record else {
                return Err(SqlGateError::compilation(
                    format!("record {idx} is not a JSON object"),
                    None,
                ));
            };
            rows.push(
                columns
                    .iter()
                    .map(|col| map.get(col).map_or(RowValues::Null, RowValues::from_json))
                    .collect(),
            );
        }
        Ok(Self {
            columns,
            rows,
            returning: None,
        })
    }

    #[must_use]
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }
}

/// Many row updates keyed by `key`, compiled into one `UPDATE`.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkUpdate {
    pub key: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RowValues>>,
    pub returning: Option<String>,
}

impl BulkUpdate {
    /// `columns` must include `key`; each row supplies one value per column.
    pub fn new<C, S>(key: impl Into<String>, columns: C, rows: Vec<Vec<RowValues>>) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
            returning: None,
        }
    }

    #[must_use]
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }
}

/// `SET` list for a single row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub columns: Vec<String>,
    pub values: Vec<RowValues>,
    pub returning: Option<String>,
}

impl RecordUpdate {
    pub fn new<I, S, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<RowValues>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(col, value)| (col.into(), value.into()))
            .unzip();
        Self {
            columns,
            values,
            returning: None,
        }
    }

    #[must_use]
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_keeps_fragment_invariant() {
        let stmt = Statement::new("SELECT * FROM ")
            .ident("people")
            .push_sql(" WHERE id = ")
            .bind(5)
            .push_sql(" AND tag IN ")
            .list(["a", "b"]);
        assert_eq!(stmt.fragments().len(), stmt.slots().len() + 1);
        assert_eq!(stmt.fragments()[0], "SELECT * FROM ");
        assert_eq!(stmt.fragments()[1], " WHERE id = ");
    }

    #[test]
    fn from_parts_rejects_mismatched_lengths() {
        let err = Statement::from_parts(vec!["a".into()], vec![Slot::Param(RowValues::Int(1))])
            .unwrap_err();
        assert!(matches!(err, SqlGateError::StatementCompilation { .. }));
    }

    #[test]
    fn append_merges_boundary_fragments() {
        let left = Statement::new("a = ").bind(1);
        let right = Statement::new(" AND b = ").bind(2);
        let merged = left.append(right);
        assert_eq!(merged.fragments(), &["a = ", " AND b = ", ""]);
        assert_eq!(merged.slots().len(), 2);
    }

    #[test]
    fn and_or_fallbacks() {
        assert_eq!(Statement::and(Vec::new()).fragments(), &["1=1"]);
        assert_eq!(Statement::or(Vec::new()).fragments(), &["1=0"]);
    }

    #[test]
    fn records_take_columns_from_first() {
        let rows = InsertRows::from_records(&[
            json!({"name": "a", "tags": ["x"]}),
            json!({"name": "b"}),
        ])
        .unwrap();
        assert_eq!(rows.columns, vec!["name".to_string(), "tags".to_string()]);
        assert_eq!(rows.rows[0][1], RowValues::Text(r#"["x"]"#.into()));
        assert_eq!(rows.rows[1][1], RowValues::Null);
    }

    #[test]
    fn records_reject_non_objects() {
        assert!(InsertRows::from_records(&[json!({"a": 1}), json!(3)]).is_err());
    }
}
