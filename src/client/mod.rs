//! The client façade.
//!
//! [`SqlClient`] compiles statements, routes them through the connection gate, and
//! runs transactions. Inside [`SqlClient::with_transaction`] every call on a clone of
//! the same client joins the open transaction without any handle being passed down.

mod config;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::Instrument;

use crate::connection::ConnectionHandle;
use crate::engine::{Engine, QueryResult, SqliteEngine};
use crate::error::SqlGateError;
use crate::gate::ConcurrencyGate;
use crate::results::ResultSet;
use crate::statement::{CompiledQuery, Statement, StatementCompiler};
use crate::transaction::context::{self, TransactionContext};
use crate::transform::NameTransform;
use crate::types::{DebugLevel, RowValues};

pub use config::{ClientOptions, ClientOptionsBuilder};

/// Handle to the one engine connection. Cheap to clone; clones share the gate,
/// the connection, and any ambient transaction.
#[derive(Clone)]
pub struct SqlClient {
    shared: Arc<Shared>,
    compiler: StatementCompiler,
    transform: Option<NameTransform>,
    debug_level: DebugLevel,
    attributes: Arc<str>,
}

struct Shared {
    options: ClientOptions,
    gate: ConcurrencyGate,
    conn: OnceCell<ConnectionHandle>,
}

impl SqlClient {
    /// Create a client that opens the bundled `SQLite` engine on first use.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConfigError`] if the options are invalid.
    pub fn new(options: ClientOptions) -> Result<Self, SqlGateError> {
        options.validate()?;
        Ok(Self::assemble(options, OnceCell::new()))
    }

    /// Create a client around an engine that is already live.
    ///
    /// `location`, `busy_timeout` and `wal` are ignored; the engine is used as given.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConfigError`] if the options are invalid, or
    /// [`SqlGateError::ConnectionError`] if the worker thread cannot be started.
    pub fn from_engine(
        engine: Box<dyn Engine>,
        options: ClientOptions,
    ) -> Result<Self, SqlGateError> {
        options.validate()?;
        let conn = ConnectionHandle::from_engine(engine)?;
        Ok(Self::assemble(options, OnceCell::new_with(Some(conn))))
    }

    fn assemble(options: ClientOptions, conn: OnceCell<ConnectionHandle>) -> Self {
        let compiler = StatementCompiler::new(options.placeholder_style)
            .with_transform(options.name_transform.clone());
        let transform = options.name_transform.clone();
        let debug_level = options.debug_level;
        let attributes: Arc<str> = options
            .span_attributes
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",")
            .into();
        Self {
            shared: Arc::new(Shared {
                options,
                gate: ConcurrencyGate::new(),
                conn,
            }),
            compiler,
            transform,
            debug_level,
            attributes,
        }
    }

    /// A client sharing this one's connection, gate, and transactions, but applying no
    /// name transform in either direction.
    #[must_use]
    pub fn without_transforms(&self) -> Self {
        Self {
            compiler: self.compiler.clone().with_transform(None),
            transform: None,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn compiler(&self) -> &StatementCompiler {
        &self.compiler
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    /// Execute a statement and decode its rows, renaming fields with the name transform.
    ///
    /// # Errors
    /// Returns [`SqlGateError::StatementCompilation`] for a malformed statement,
    /// [`SqlGateError::SqlExecution`] if the engine rejects it, and
    /// [`SqlGateError::TransactionProtocol`] if the ambient transaction is aborted.
    pub async fn execute(&self, statement: &Statement) -> Result<ResultSet, SqlGateError> {
        let raw = self.execute_raw(statement).await?;
        Ok(ResultSet::from_raw(raw, self.transform.as_ref()))
    }

    /// Execute a statement and return the engine-native result.
    ///
    /// # Errors
    /// See [`SqlClient::execute`].
    pub async fn execute_raw(&self, statement: &Statement) -> Result<QueryResult, SqlGateError> {
        let query = self.compiler.compile(statement)?;
        self.run(query).await
    }

    /// Execute a statement and return rows as positional arrays.
    ///
    /// # Errors
    /// See [`SqlClient::execute`].
    pub async fn execute_values(
        &self,
        statement: &Statement,
    ) -> Result<Vec<Vec<RowValues>>, SqlGateError> {
        Ok(self.execute_raw(statement).await?.rows)
    }

    /// Run `body` inside a transaction.
    ///
    /// The outermost call takes the connection gate for its whole extent and issues
    /// `BEGIN`; calls nested inside it (directly or through any helper using a clone of
    /// this client) open savepoints instead. `Ok` commits, `Err` rolls back, and
    /// dropping the future before it finishes queues the rollback ahead of any other
    /// caller's statements. A failed nested call rolls back only its savepoint; the
    /// outer transaction can still commit.
    ///
    /// Nested calls must run one after another. If several are awaited concurrently
    /// inside one transaction and one finishes while a sibling's savepoint is still open
    /// above its own, it fails with [`SqlGateError::TransactionProtocol`] and the whole
    /// transaction is rolled back.
    ///
    /// # Errors
    /// Returns the body's own error, or [`SqlGateError::TransactionProtocol`] (converted
    /// into `E`) when a control statement fails.
    pub async fn with_transaction<F, Fut, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SqlGateError>,
    {
        let conn = self.connection().await?.clone();
        let depth = TransactionContext::current_on(&conn).and_then(|ctx| ctx.depth());
        let span = self.span("transaction", depth);
        context::with_transaction(
            conn,
            &self.shared.gate,
            self.shared.options.release_savepoints,
            body,
        )
        .instrument(span)
        .await
    }

    /// Depth of the ambient transaction on this client: `Some(0)` in the outermost
    /// transaction, `None` outside any.
    #[must_use]
    pub fn transaction_depth(&self) -> Option<usize> {
        self.shared
            .conn
            .get()
            .and_then(TransactionContext::current_on)
            .and_then(|ctx| ctx.depth())
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction_depth().is_some()
    }

    /// True when no statement or transaction currently holds the connection.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.gate.is_free()
    }

    /// Wait for the connection to become free, then shut the engine down.
    ///
    /// Every later call fails with [`SqlGateError::ConnectionError`].
    ///
    /// # Errors
    /// Returns [`SqlGateError::TransactionProtocol`] when called inside a transaction on
    /// this client, or [`SqlGateError::ConnectionError`] if the engine fails to close.
    pub async fn close(&self) -> Result<(), SqlGateError> {
        if self.in_transaction() {
            return Err(SqlGateError::protocol(
                "cannot close the client from inside a transaction",
            ));
        }
        let permit = self.shared.gate.acquire().await?;
        self.shared.gate.close();
        let result = match self.shared.conn.get() {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };
        drop(permit);
        tracing::debug!("sql-gate client closed");
        result
    }

    async fn connection(&self) -> Result<&ConnectionHandle, SqlGateError> {
        if self.shared.gate.is_closed() {
            return Err(SqlGateError::ConnectionError("client is closed".into()));
        }
        let options = &self.shared.options;
        self.shared
            .conn
            .get_or_try_init(|| {
                let location = options.location.clone();
                let busy_timeout = options.busy_timeout;
                let wal = options.wal;
                tracing::debug!(location = ?location, "opening sqlite engine");
                ConnectionHandle::open(move || {
                    let mut engine = SqliteEngine::open(&location)?;
                    if let Some(timeout) = busy_timeout {
                        engine.set_busy_timeout(timeout)?;
                    }
                    if wal {
                        engine.apply_wal_pragmas()?;
                    }
                    Ok(Box::new(engine) as Box<dyn Engine>)
                })
            })
            .await
    }

    async fn run(&self, query: CompiledQuery) -> Result<QueryResult, SqlGateError> {
        let conn = self.connection().await?;
        let ambient = TransactionContext::current_on(conn);
        let depth = ambient.as_ref().and_then(|ctx| ctx.depth());
        let span = self.span("execute", depth);
        async move {
            self.log_query(&query);
            match ambient {
                Some(ctx) => ctx.execute(query).await,
                None => {
                    let permit = self.shared.gate.acquire().await?;
                    conn.run_raw(query, Some(permit)).await
                }
            }
        }
        .instrument(span)
        .await
    }

    fn span(&self, operation: &'static str, depth: Option<usize>) -> tracing::Span {
        tracing::debug_span!(
            "sql_gate.execute",
            operation,
            depth = ?depth,
            attributes = %self.attributes,
        )
    }

    fn log_query(&self, query: &CompiledQuery) {
        match self.debug_level {
            DebugLevel::Off => {}
            DebugLevel::Statements => tracing::debug!(sql = %query.sql, "executing statement"),
            DebugLevel::Parameters => tracing::debug!(
                sql = %query.sql,
                params = ?query.params,
                "executing statement"
            ),
        }
    }
}

impl std::fmt::Debug for SqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlClient")
            .field("options", &self.shared.options)
            .field("gate", &self.shared.gate)
            .field("connected", &self.shared.conn.initialized())
            .finish_non_exhaustive()
    }
}
