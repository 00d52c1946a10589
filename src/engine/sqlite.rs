use std::path::PathBuf;
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use crate::error::EngineError;
use crate::types::RowValues;

use super::{Engine, QueryResult};

/// Where the bundled `SQLite` engine keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DbLocation {
    #[default]
    Memory,
    Path(PathBuf),
}

/// `SQLite` engine over a single `rusqlite` connection.
pub struct SqliteEngine {
    conn: Connection,
}

impl SqliteEngine {
    /// Open the database at `location`.
    ///
    /// # Errors
    /// Returns [`EngineError::Sqlite`] if the database cannot be opened.
    pub fn open(location: &DbLocation) -> Result<Self, EngineError> {
        let conn = match location {
            DbLocation::Memory => Connection::open_in_memory()?,
            DbLocation::Path(path) => Connection::open(path)?,
        };
        Ok(Self { conn })
    }

    /// Wrap an already open connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Apply `PRAGMA busy_timeout`.
    ///
    /// # Errors
    /// Returns [`EngineError::Sqlite`] if the pragma is rejected.
    pub fn set_busy_timeout(&mut self, timeout: Duration) -> Result<(), EngineError> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Switch the journal to WAL.
    ///
    /// # Errors
    /// Returns [`EngineError::Sqlite`] if the pragma is rejected.
    pub fn apply_wal_pragmas(&mut self) -> Result<(), EngineError> {
        self.conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(())
    }
}

impl SqliteEngine {
    /// `changes()` and `last_insert_rowid()` keep the values of the last DML statement,
    /// so they are only read back for statements that can have set them.
    fn write_metadata(&self, kind: StatementKind) -> (usize, Option<i64>) {
        if kind == StatementKind::Other {
            return (0, None);
        }
        let changes = usize::try_from(self.conn.changes()).unwrap_or(usize::MAX);
        let rowid = (kind == StatementKind::Insert && changes > 0)
            .then(|| self.conn.last_insert_rowid());
        (changes, rowid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Insert,
    /// `UPDATE`, `DELETE`, or a writing statement behind a `WITH` clause.
    Write,
    Other,
}

impl StatementKind {
    fn of(sql: &str, readonly: bool) -> Self {
        let keyword: String = sql
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .chars()
            .take_while(char::is_ascii_alphabetic)
            .collect::<String>()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "INSERT" | "REPLACE" => StatementKind::Insert,
            "UPDATE" | "DELETE" => StatementKind::Write,
            "WITH" if !readonly => StatementKind::Write,
            _ => StatementKind::Other,
        }
    }
}

impl Engine for SqliteEngine {
    fn query(&mut self, sql: &str, params: &[RowValues]) -> Result<QueryResult, EngineError> {
        let values: Vec<Value> = params.iter().map(row_value_to_sqlite_value).collect();
        let mut stmt = self.conn.prepare_cached(sql)?;
        let column_count = stmt.column_count();
        let kind = StatementKind::of(sql, stmt.readonly());

        if column_count == 0 {
            stmt.execute(params_from_iter(values.iter()))?;
            drop(stmt);
            let (rows_affected, last_insert_rowid) = self.write_metadata(kind);
            return Ok(QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                rows_affected,
                last_insert_rowid,
            });
        }

        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect();
        let mut rows = Vec::new();
        {
            let mut cursor = stmt.query(params_from_iter(values.iter()))?;
            while let Some(row) = cursor.next()? {
                let mut decoded = Vec::with_capacity(column_count);
                for idx in 0..column_count {
                    decoded.push(sqlite_extract_value(row, idx)?);
                }
                rows.push(decoded);
            }
        }
        drop(stmt);

        let (rows_affected, last_insert_rowid) = self.write_metadata(kind);
        Ok(QueryResult {
            columns,
            rows,
            rows_affected,
            last_insert_rowid,
        })
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        let engine = *self;
        engine.conn.close().map_err(|(_, err)| EngineError::Sqlite(err))
    }
}

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

fn sqlite_extract_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<RowValues, EngineError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executes_dml_and_selects() {
        let mut engine = SqliteEngine::open(&DbLocation::Memory).unwrap();
        engine
            .query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let inserted = engine
            .query(
                "INSERT INTO t (name) VALUES (?1), (?2)",
                &[RowValues::from("a"), RowValues::from("b")],
            )
            .unwrap();
        assert_eq!(inserted.rows_affected, 2);

        let selected = engine
            .query("SELECT id, name FROM t ORDER BY id", &[])
            .unwrap();
        assert_eq!(selected.columns, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(selected.rows.len(), 2);
        assert_eq!(selected.rows[1][1], RowValues::Text("b".into()));
        assert_eq!(selected.rows_affected, 0);
    }

    #[test]
    fn returning_clause_reports_rows_and_changes() {
        let mut engine = SqliteEngine::open(&DbLocation::Memory).unwrap();
        engine
            .query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let res = engine
            .query(
                "INSERT INTO t (name) VALUES (?1) RETURNING id",
                &[RowValues::from("a")],
            )
            .unwrap();
        assert_eq!(res.rows, vec![vec![RowValues::Int(1)]]);
        assert_eq!(res.rows_affected, 1);
    }

    #[test]
    fn write_metadata_is_not_carried_over() {
        let mut engine = SqliteEngine::open(&DbLocation::Memory).unwrap();
        engine
            .query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let inserted = engine
            .query("INSERT INTO t (name) VALUES ('a'), ('b')", &[])
            .unwrap();
        assert_eq!(inserted.last_insert_rowid, Some(2));

        for sql in ["BEGIN", "CREATE TABLE u (x INTEGER)", "COMMIT"] {
            let res = engine.query(sql, &[]).unwrap();
            assert_eq!(res.rows_affected, 0, "{sql}");
            assert_eq!(res.last_insert_rowid, None, "{sql}");
        }

        let updated = engine
            .query("UPDATE t SET name = 'z' WHERE id = 1", &[])
            .unwrap();
        assert_eq!(updated.rows_affected, 1);
        assert_eq!(updated.last_insert_rowid, None);

        let ignored = engine
            .query("INSERT OR IGNORE INTO t (id, name) VALUES (1, 'dup')", &[])
            .unwrap();
        assert_eq!(ignored.rows_affected, 0);
        assert_eq!(ignored.last_insert_rowid, None);
    }

    #[test]
    fn bools_and_json_bind_as_sqlite_storage() {
        assert_eq!(row_value_to_sqlite_value(&RowValues::Bool(true)), Value::Integer(1));
        assert_eq!(
            row_value_to_sqlite_value(&RowValues::JSON(serde_json::json!({"a": 1}))),
            Value::Text(r#"{"a":1}"#.into())
        );
    }
}
