use thiserror::Error;

/// Failure reported by the engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Engines other than the bundled `SQLite` one report their failure as text.
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum SqlGateError {
    /// The statement shape cannot be compiled. Programmer error, never retried.
    #[error("Statement compilation error{}: {message}", slot_suffix(*slot))]
    StatementCompilation {
        message: String,
        /// Index of the offending slot inside the statement, when known.
        slot: Option<usize>,
    },

    /// The engine rejected or failed a statement.
    #[error("SQL execution error: {source} (statement: {sql})")]
    SqlExecution {
        sql: String,
        param_count: usize,
        #[source]
        source: EngineError,
    },

    /// A control statement failed, or a transition was attempted from an invalid state.
    #[error("Transaction protocol error: {message}{}", rollback_suffix(rollback_error.as_deref()))]
    TransactionProtocol {
        message: String,
        statement: Option<String>,
        #[source]
        source: Option<Box<SqlGateError>>,
        /// Failure of the follow-up rollback, reported alongside the original cause.
        rollback_error: Option<Box<SqlGateError>>,
    },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SqlGateError {
    pub(crate) fn compilation(message: impl Into<String>, slot: Option<usize>) -> Self {
        SqlGateError::StatementCompilation {
            message: message.into(),
            slot,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        SqlGateError::TransactionProtocol {
            message: message.into(),
            statement: None,
            source: None,
            rollback_error: None,
        }
    }

    pub(crate) fn control_failed(
        statement: &str,
        source: SqlGateError,
        rollback_error: Option<SqlGateError>,
    ) -> Self {
        SqlGateError::TransactionProtocol {
            message: format!("control statement `{statement}` failed"),
            statement: Some(statement.to_owned()),
            source: Some(Box::new(source)),
            rollback_error: rollback_error.map(Box::new),
        }
    }

    /// True for failures caused by the engine rejecting a statement.
    #[must_use]
    pub fn is_execution(&self) -> bool {
        matches!(self, SqlGateError::SqlExecution { .. })
    }

    /// True for transaction protocol failures.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, SqlGateError::TransactionProtocol { .. })
    }

    /// The statement text associated with this error, if any.
    #[must_use]
    pub fn statement(&self) -> Option<&str> {
        match self {
            SqlGateError::SqlExecution { sql, .. } => Some(sql),
            SqlGateError::TransactionProtocol { statement, .. } => statement.as_deref(),
            _ => None,
        }
    }
}

fn slot_suffix(slot: Option<usize>) -> String {
    slot.map(|idx| format!(" at slot {idx}")).unwrap_or_default()
}

fn rollback_suffix(rollback: Option<&SqlGateError>) -> String {
    rollback
        .map(|err| format!(" (rollback also failed: {err})"))
        .unwrap_or_default()
}
