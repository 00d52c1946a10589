//! Engine wrappers for tests: record every statement an engine receives and inject
//! failures into chosen ones.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::engine::{DbLocation, Engine, QueryResult, SqliteEngine};
use crate::error::EngineError;
use crate::types::RowValues;

/// Shared, cloneable view of the statements a [`RecordingEngine`] has seen.
#[derive(Debug, Clone, Default)]
pub struct StatementLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl StatementLog {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, sql: &str) {
        self.lock().push(sql.to_owned());
    }

    /// Every statement in execution order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Only `BEGIN`/`COMMIT`/`ROLLBACK`/`SAVEPOINT`/`RELEASE` statements.
    #[must_use]
    pub fn control_statements(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|sql| is_control(sql))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

fn is_control(sql: &str) -> bool {
    ["BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE"]
        .iter()
        .any(|prefix| sql.starts_with(prefix))
}

/// Wraps another engine, logging each statement before running it.
pub struct RecordingEngine {
    inner: Box<dyn Engine>,
    log: StatementLog,
    fail_prefixes: Vec<String>,
    delay: Option<Duration>,
}

impl RecordingEngine {
    #[must_use]
    pub fn new(inner: Box<dyn Engine>) -> (Self, StatementLog) {
        let log = StatementLog::default();
        let engine = Self {
            inner,
            log: log.clone(),
            fail_prefixes: Vec::new(),
            delay: None,
        };
        (engine, log)
    }

    /// Record statements run against a fresh in-memory `SQLite` database.
    ///
    /// # Errors
    /// Returns [`EngineError::Sqlite`] if the database cannot be opened.
    pub fn sqlite_memory() -> Result<(Self, StatementLog), EngineError> {
        let engine = SqliteEngine::open(&DbLocation::Memory)?;
        Ok(Self::new(Box::new(engine)))
    }

    /// Fail every statement whose text starts with `prefix`, without running it.
    #[must_use]
    pub fn fail_on(mut self, prefix: impl Into<String>) -> Self {
        self.fail_prefixes.push(prefix.into());
        self
    }

    /// Block the worker for `delay` before each statement.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Engine for RecordingEngine {
    fn query(&mut self, sql: &str, params: &[RowValues]) -> Result<QueryResult, EngineError> {
        self.log.push(sql);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_prefixes.iter().any(|prefix| sql.starts_with(prefix)) {
            return Err(EngineError::Other(format!("injected failure for `{sql}`")));
        }
        self.inner.query(sql, params)
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        let engine = *self;
        engine.inner.close()
    }
}
