//! The single live engine connection.
//!
//! The engine is owned by a dedicated worker thread and driven over a FIFO
//! command channel, so statements reach it strictly in dispatch order and
//! one at a time. The handle itself gives no exclusion between callers:
//! hold a [`GatePermit`] (or be inside the transaction that holds it).

mod worker;

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::engine::{Engine, QueryResult};
use crate::error::{EngineError, SqlGateError};
use crate::gate::GatePermit;
use crate::results::ResultSet;
use crate::statement::CompiledQuery;
use crate::types::RowValues;

use worker::{Command, Worker};

/// Cloneable handle to the worker-owned engine.
#[derive(Clone)]
pub struct ConnectionHandle {
    worker: Arc<Worker>,
}

/// A statement already queued on the worker.
pub(crate) struct Pending {
    sql: String,
    param_count: usize,
    reply: oneshot::Receiver<Result<QueryResult, EngineError>>,
}

impl Pending {
    pub(crate) async fn wait(self) -> Result<QueryResult, SqlGateError> {
        match self.reply.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(source)) => Err(SqlGateError::SqlExecution {
                sql: self.sql,
                param_count: self.param_count,
                source,
            }),
            Err(_) => Err(SqlGateError::ConnectionError(
                "engine worker dropped while executing statement".into(),
            )),
        }
    }
}

impl ConnectionHandle {
    /// Open an engine on a fresh worker thread.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConnectionError`] if the thread cannot be spawned or the
    /// engine fails to open.
    pub async fn open<F>(opener: F) -> Result<Self, SqlGateError>
    where
        F: FnOnce() -> Result<Box<dyn Engine>, EngineError> + Send + 'static,
    {
        let worker = Worker::spawn(Box::new(opener)).await?;
        Ok(Self {
            worker: Arc::new(worker),
        })
    }

    /// Hand an already open engine to a fresh worker thread.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConnectionError`] if the worker thread cannot be spawned.
    pub fn from_engine(engine: Box<dyn Engine>) -> Result<Self, SqlGateError> {
        let worker = Worker::adopt(engine)?;
        Ok(Self {
            worker: Arc::new(worker),
        })
    }

    /// Execute and decode rows.
    ///
    /// Pass the caller's permit for a bare statement; the worker releases it once the
    /// statement has finished.
    ///
    /// # Errors
    /// Returns [`SqlGateError::SqlExecution`] if the engine rejects the statement.
    pub async fn run(
        &self,
        query: CompiledQuery,
        permit: Option<GatePermit>,
    ) -> Result<ResultSet, SqlGateError> {
        let raw = self.run_raw(query, permit).await?;
        Ok(ResultSet::from_raw(raw, None))
    }

    /// Execute and return the engine-native result.
    ///
    /// # Errors
    /// Returns [`SqlGateError::SqlExecution`] if the engine rejects the statement.
    pub async fn run_raw(
        &self,
        query: CompiledQuery,
        permit: Option<GatePermit>,
    ) -> Result<QueryResult, SqlGateError> {
        self.dispatch(query, permit)?.wait().await
    }

    /// Execute and return rows as positional arrays without field names.
    ///
    /// # Errors
    /// Returns [`SqlGateError::SqlExecution`] if the engine rejects the statement.
    pub async fn execute_values(
        &self,
        query: CompiledQuery,
        permit: Option<GatePermit>,
    ) -> Result<Vec<Vec<RowValues>>, SqlGateError> {
        Ok(self.run_raw(query, permit).await?.rows)
    }

    /// Queue a statement without waiting for it.
    pub(crate) fn dispatch(
        &self,
        query: CompiledQuery,
        permit: Option<GatePermit>,
    ) -> Result<Pending, SqlGateError> {
        let (respond_to, reply) = oneshot::channel();
        let sql = query.sql.clone();
        let param_count = query.params.len();
        self.worker.send(Command::Query {
            sql: query.sql,
            params: query.params,
            permit,
            respond_to,
        })?;
        Ok(Pending {
            sql,
            param_count,
            reply,
        })
    }

    /// Queue a fire-and-forget statement; the permit is released after it runs.
    pub(crate) fn send_cleanup(&self, sql: &str, permit: Option<GatePermit>) {
        let command = Command::Cleanup {
            sql: sql.to_owned(),
            permit,
        };
        if let Err(err) = self.worker.send(command) {
            tracing::warn!(statement = %sql, error = %err, "could not queue cleanup statement");
        }
    }

    /// Release `permit` once every statement queued before this call has run.
    pub(crate) fn release_after_pending(&self, permit: GatePermit) {
        let _ = self.worker.send(Command::Release { permit });
    }

    /// Shut the worker down and close the engine.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConnectionError`] if the worker is already gone or the
    /// engine fails to close.
    pub async fn close(&self) -> Result<(), SqlGateError> {
        let (respond_to, reply) = oneshot::channel();
        self.worker.send(Command::Shutdown {
            respond_to: Some(respond_to),
        })?;
        match reply.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(SqlGateError::ConnectionError(format!(
                "engine close failed: {err}"
            ))),
            Err(_) => Err(SqlGateError::ConnectionError(
                "engine worker dropped during shutdown".into(),
            )),
        }
    }

    pub(crate) fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.worker, &other.worker)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("worker", &Arc::as_ptr(&self.worker))
            .finish()
    }
}
