use std::collections::HashSet;
use std::fmt::Write;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SqlGateError;
use crate::transform::NameTransform;
use crate::types::RowValues;

use super::{BulkUpdate, Ident, InsertRows, RecordUpdate, Slot, Statement};

/// Positional parameter marker style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderStyle {
    /// `SQLite`-style placeholders like `?1`.
    #[default]
    Sqlite,
    /// PostgreSQL-style placeholders like `$1`.
    Postgres,
}

/// Final SQL text plus the flat parameter list it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<RowValues>,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn without_params(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Deterministic translation of a [`Statement`] into a [`CompiledQuery`].
#[derive(Debug, Clone, Default)]
pub struct StatementCompiler {
    style: PlaceholderStyle,
    transform: Option<NameTransform>,
}

impl StatementCompiler {
    #[must_use]
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            transform: None,
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Option<NameTransform>) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    /// Marker for the 1-based parameter `index`.
    #[must_use]
    pub fn placeholder(&self, index: usize) -> String {
        match self.style {
            PlaceholderStyle::Sqlite => format!("?{index}"),
            PlaceholderStyle::Postgres => format!("${index}"),
        }
    }

    /// Quote an identifier, doubling embedded quotes. The name transform applies unless
    /// the identifier was built with [`Ident::verbatim`].
    ///
    /// # Errors
    /// Returns [`SqlGateError::StatementCompilation`] for an identifier with no parts or
    /// with a part that is empty after the name transform.
    pub fn compile_identifier(&self, ident: &Ident) -> Result<String, SqlGateError> {
        if ident.parts.is_empty() {
            return Err(SqlGateError::compilation("identifier has no parts", None));
        }
        let mut out = String::new();
        for (idx, part) in ident.parts.iter().enumerate() {
            if idx > 0 {
                out.push('.');
            }
            let name = match (&self.transform, ident.transform) {
                (Some(transform), true) => transform.outgoing(part),
                _ => part.clone(),
            };
            if name.is_empty() {
                return Err(SqlGateError::compilation(
                    format!("identifier part {idx} is empty"),
                    None,
                ));
            }
            quote_into(&mut out, &name);
        }
        Ok(out)
    }

    /// Compile a full statement.
    ///
    /// # Errors
    /// Returns [`SqlGateError::StatementCompilation`] naming the offending slot when a bulk
    /// shape or list is malformed.
    pub fn compile(&self, statement: &Statement) -> Result<CompiledQuery, SqlGateError> {
        let mut writer = Writer::new(self);
        let mut fragments = statement.fragments.iter();
        if let Some(head) = fragments.next() {
            writer.sql.push_str(head);
        }
        for (idx, (slot, fragment)) in statement.slots.iter().zip(fragments).enumerate() {
            writer.slot(slot).map_err(|err| at_slot(err, idx))?;
            writer.sql.push_str(fragment);
        }
        Ok(writer.finish())
    }

    /// `(col, ...) VALUES (...), (...)` with one group per row.
    ///
    /// # Errors
    /// Fails on empty columns, empty rows, duplicate columns, or a row of the wrong width.
    pub fn compile_insert(&self, rows: &InsertRows) -> Result<CompiledQuery, SqlGateError> {
        let mut writer = Writer::new(self);
        writer.insert(rows)?;
        Ok(writer.finish())
    }

    /// One `UPDATE` body covering every row via `CASE` expressions.
    ///
    /// # Errors
    /// Fails on empty rows, a key missing from `columns`, no non-key columns, duplicate
    /// columns, or a row of the wrong width.
    pub fn compile_bulk_update(&self, update: &BulkUpdate) -> Result<CompiledQuery, SqlGateError> {
        let mut writer = Writer::new(self);
        writer.bulk_update(update)?;
        Ok(writer.finish())
    }

    /// `col1 = ?1, col2 = ?2` for a single row.
    ///
    /// # Errors
    /// Fails on empty or duplicate columns, or a column/value count mismatch.
    pub fn compile_single_record_update(
        &self,
        record: &RecordUpdate,
    ) -> Result<CompiledQuery, SqlGateError> {
        let mut writer = Writer::new(self);
        writer.record(record)?;
        Ok(writer.finish())
    }

    fn column(&self, name: &str) -> Result<String, SqlGateError> {
        self.compile_identifier(&Ident::new(name))
    }

    /// Quote every column, rejecting an empty list and names that collide once the
    /// name transform has been applied.
    fn columns(&self, columns: &[String], what: &str) -> Result<Vec<String>, SqlGateError> {
        if columns.is_empty() {
            return Err(SqlGateError::compilation(format!("{what} has no columns"), None));
        }
        let mut quoted = Vec::with_capacity(columns.len());
        let mut seen = HashSet::with_capacity(columns.len());
        for col in columns {
            let name = self.column(col)?;
            if !seen.insert(name.clone()) {
                return Err(SqlGateError::compilation(
                    format!("{what} lists column {name} more than once"),
                    None,
                ));
            }
            quoted.push(name);
        }
        Ok(quoted)
    }
}

fn quote_into(out: &mut String, name: &str) {
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}

fn at_slot(err: SqlGateError, idx: usize) -> SqlGateError {
    match err {
        SqlGateError::StatementCompilation { message, slot: None } => {
            SqlGateError::StatementCompilation {
                message,
                slot: Some(idx),
            }
        }
        other => other,
    }
}

fn check_rows(rows: &[Vec<RowValues>], width: usize, what: &str) -> Result<(), SqlGateError> {
    if rows.is_empty() {
        return Err(SqlGateError::compilation(format!("{what} has no rows"), None));
    }
    for (idx, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(SqlGateError::compilation(
                format!("{what} row {idx} has {} values, expected {width}", row.len()),
                None,
            ));
        }
    }
    Ok(())
}

struct Writer<'c> {
    compiler: &'c StatementCompiler,
    sql: String,
    params: Vec<RowValues>,
}

impl<'c> Writer<'c> {
    fn new(compiler: &'c StatementCompiler) -> Self {
        Self {
            compiler,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            params: self.params,
        }
    }

    fn bind(&mut self, value: RowValues) {
        self.params.push(value);
        let marker = self.compiler.placeholder(self.params.len());
        self.sql.push_str(&marker);
    }

    fn returning(&mut self, column: Option<&String>) -> Result<(), SqlGateError> {
        if let Some(col) = column {
            let quoted = self.compiler.column(col)?;
            let _ = write!(self.sql, " RETURNING {quoted}");
        }
        Ok(())
    }

    fn slot(&mut self, slot: &Slot) -> Result<(), SqlGateError> {
        match slot {
            Slot::Param(value) => self.bind(value.clone()),
            Slot::Identifier(ident) => {
                let quoted = self.compiler.compile_identifier(ident)?;
                self.sql.push_str(&quoted);
            }
            Slot::Json(value) => self.bind(RowValues::JSON(value.clone())),
            Slot::List(values) => {
                if values.is_empty() {
                    return Err(SqlGateError::compilation("parameter list is empty", None));
                }
                self.sql.push('(');
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        self.sql.push_str(", ");
                    }
                    self.bind(value.clone());
                }
                self.sql.push(')');
            }
            Slot::Insert(rows) => self.insert(rows)?,
            Slot::BulkUpdate(update) => self.bulk_update(update)?,
            Slot::Record(record) => self.record(record)?,
            Slot::Raw(text) => self.sql.push_str(text),
        }
        Ok(())
    }

    fn insert(&mut self, rows: &InsertRows) -> Result<(), SqlGateError> {
        let columns = self.compiler.columns(&rows.columns, "insert")?;
        check_rows(&rows.rows, columns.len(), "insert")?;

        self.sql.push('(');
        self.sql.push_str(&columns.join(","));
        self.sql.push_str(") VALUES ");
        for (row_idx, row) in rows.rows.iter().enumerate() {
            if row_idx > 0 {
                self.sql.push(',');
            }
            self.sql.push('(');
            for (idx, value) in row.iter().enumerate() {
                if idx > 0 {
                    self.sql.push(',');
                }
                self.bind(value.clone().into_bulk_value());
            }
            self.sql.push(')');
        }
        self.returning(rows.returning.as_ref())
    }

    fn bulk_update(&mut self, update: &BulkUpdate) -> Result<(), SqlGateError> {
        let columns = self.compiler.columns(&update.columns, "bulk update")?;
        check_rows(&update.rows, columns.len(), "bulk update")?;
        let key_idx = update
            .columns
            .iter()
            .position(|col| *col == update.key)
            .ok_or_else(|| {
                SqlGateError::compilation(
                    format!("bulk update key `{}` is not among its columns", update.key),
                    None,
                )
            })?;
        let set_columns: Vec<(usize, &String)> = columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != key_idx)
            .collect();
        if set_columns.is_empty() {
            return Err(SqlGateError::compilation(
                "bulk update has no columns besides its key",
                None,
            ));
        }

        let key = &columns[key_idx];
        for (n, (col_idx, quoted)) in set_columns.iter().enumerate() {
            if n > 0 {
                self.sql.push_str(", ");
            }
            let _ = write!(self.sql, "{quoted} = CASE");
            for row in &update.rows {
                let _ = write!(self.sql, " WHEN {key} = ");
                self.bind(row[key_idx].clone().into_bulk_value());
                self.sql.push_str(" THEN ");
                self.bind(row[*col_idx].clone().into_bulk_value());
            }
            let _ = write!(self.sql, " ELSE {quoted} END");
        }
        let _ = write!(self.sql, " WHERE {key} IN (");
        for (idx, row) in update.rows.iter().enumerate() {
            if idx > 0 {
                self.sql.push_str(", ");
            }
            self.bind(row[key_idx].clone().into_bulk_value());
        }
        self.sql.push(')');
        self.returning(update.returning.as_ref())
    }

    fn record(&mut self, record: &RecordUpdate) -> Result<(), SqlGateError> {
        let columns = self.compiler.columns(&record.columns, "record update")?;
        if columns.len() != record.values.len() {
            return Err(SqlGateError::compilation(
                format!(
                    "record update has {} columns but {} values",
                    record.columns.len(),
                    record.values.len()
                ),
                None,
            ));
        }
        for (idx, (quoted, value)) in columns.iter().zip(&record.values).enumerate() {
            if idx > 0 {
                self.sql.push_str(", ");
            }
            let _ = write!(self.sql, "{quoted} = ");
            self.bind(value.clone());
        }
        self.returning(record.returning.as_ref())
    }
}
