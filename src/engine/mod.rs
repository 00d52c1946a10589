//! The engine's raw query entry point.
//!
//! An [`Engine`] is driven from exactly one worker thread (see [`crate::connection`]),
//! so implementations need `Send` but never `Sync`.

pub mod sqlite;

use crate::error::EngineError;
use crate::types::RowValues;

pub use sqlite::{DbLocation, SqliteEngine};

/// Engine-native result: positional rows plus statement metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RowValues>>,
    pub rows_affected: usize,
    pub last_insert_rowid: Option<i64>,
}

/// A single-connection, in-process relational engine.
pub trait Engine: Send + 'static {
    /// Run one statement with positional parameters.
    ///
    /// # Errors
    /// Returns the engine's own failure; callers wrap it with the statement text.
    fn query(&mut self, sql: &str, params: &[RowValues]) -> Result<QueryResult, EngineError>;

    /// Called once on the worker thread when the connection is shut down.
    fn close(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}
