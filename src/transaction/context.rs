use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connection::ConnectionHandle;
use crate::engine::QueryResult;
use crate::error::SqlGateError;
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::statement::CompiledQuery;

use super::{ControlStatement, TransactionManager, TransactionState};

tokio::task_local! {
    static CURRENT: Arc<TransactionContext>;
}

/// The transaction visible to code running inside `with_transaction`.
///
/// Lives in a task-local slot scoped to the outermost call; nested calls reuse it
/// instead of going back to the gate.
pub(crate) struct TransactionContext {
    conn: ConnectionHandle,
    manager: Mutex<TransactionManager>,
    poisoned: AtomicBool,
}

impl TransactionContext {
    fn new(conn: ConnectionHandle, release_savepoints: bool) -> Self {
        Self {
            conn,
            manager: Mutex::new(TransactionManager::new(release_savepoints)),
            poisoned: AtomicBool::new(false),
        }
    }

    /// The ambient transaction, if it was opened on `conn`.
    pub(crate) fn current_on(conn: &ConnectionHandle) -> Option<Arc<Self>> {
        CURRENT
            .try_with(Arc::clone)
            .ok()
            .filter(|ctx| ctx.conn.same_connection(conn))
    }

    pub(crate) fn depth(&self) -> Option<usize> {
        self.manager().depth()
    }

    /// Run a statement on the held connection.
    pub(crate) async fn execute(&self, query: CompiledQuery) -> Result<QueryResult, SqlGateError> {
        self.ensure_usable()?;
        self.conn.run_raw(query, None).await
    }

    fn manager(&self) -> MutexGuard<'_, TransactionManager> {
        match self.manager.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_usable(&self) -> Result<(), SqlGateError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(SqlGateError::protocol(
                "transaction aborted after a failed control statement",
            ));
        }
        match self.manager().state() {
            TransactionState::Open(_) => Ok(()),
            state => Err(SqlGateError::protocol(format!(
                "transaction is no longer open ({state:?})"
            ))),
        }
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    async fn run_control(&self, stmt: &ControlStatement) -> Result<(), SqlGateError> {
        tracing::trace!(statement = %stmt, "transaction control");
        self.conn
            .dispatch(CompiledQuery::without_params(stmt.sql()), None)?
            .wait()
            .await
            .map(|_| ())
    }
}

/// Run `body` inside a transaction on `conn`, nesting into the ambient one when present.
pub(crate) async fn with_transaction<F, Fut, T, E>(
    conn: ConnectionHandle,
    gate: &ConcurrencyGate,
    release_savepoints: bool,
    body: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<SqlGateError>,
{
    match TransactionContext::current_on(&conn) {
        Some(ctx) => run_nested(ctx, body).await,
        None => run_outermost(conn, gate, release_savepoints, body).await,
    }
}

async fn run_outermost<F, Fut, T, E>(
    conn: ConnectionHandle,
    gate: &ConcurrencyGate,
    release_savepoints: bool,
    body: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<SqlGateError>,
{
    // Cancellation is harmless up to here: nothing has been sent yet.
    let permit = gate.acquire().await?;
    let ctx = Arc::new(TransactionContext::new(conn, release_savepoints));
    let mut guard = OutermostGuard {
        ctx: Arc::clone(&ctx),
        permit: Some(permit),
        rollback_queued: false,
    };
    guard.begin().await?;

    let outcome = CURRENT.scope(ctx, async move { body().await }).await;
    match outcome {
        Ok(value) => {
            guard.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = guard.rollback().await {
                tracing::error!(error = %rollback_err, "rollback failed after transaction error");
            }
            Err(err)
        }
    }
}

async fn run_nested<F, Fut, T, E>(ctx: Arc<TransactionContext>, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<SqlGateError>,
{
    ctx.ensure_usable()?;
    let stmt = ctx.manager().begin()?;
    let name = match stmt.savepoint_name() {
        Some(name) => name.to_owned(),
        None => {
            ctx.poison();
            let err = SqlGateError::protocol("nested transaction did not open a savepoint");
            return Err(err.into());
        }
    };
    let mut guard = SavepointGuard {
        ctx: Arc::clone(&ctx),
        name: name.clone(),
        armed: true,
    };
    if let Err(err) = ctx.run_control(&stmt).await {
        guard.armed = false;
        ctx.manager().forget_savepoint(&name);
        ctx.poison();
        return Err(SqlGateError::control_failed(&stmt.sql(), err, None).into());
    }

    let outcome = body().await;
    guard.armed = false;
    match outcome {
        Ok(value) => {
            let release = ctx.manager().release(&name);
            let release = match release {
                Ok(release) => release,
                Err(err) => {
                    // Out of order: a sibling scope is still open on top of this one.
                    ctx.poison();
                    return Err(err.into());
                }
            };
            if let Some(stmt) = release
                && let Err(err) = ctx.run_control(&stmt).await
            {
                ctx.poison();
                return Err(SqlGateError::control_failed(&stmt.sql(), err, None).into());
            }
            Ok(value)
        }
        Err(err) => {
            let rollback = ctx.manager().rollback_to(&name);
            let result = match rollback {
                Ok(stmt) => ctx.run_control(&stmt).await,
                Err(protocol) => Err(protocol),
            };
            if let Err(rollback_err) = result {
                ctx.poison();
                tracing::error!(error = %rollback_err, "savepoint rollback failed");
            }
            Err(err)
        }
    }
}

/// Owns the gate permit for the outermost transaction.
///
/// Dropped while still open (cancellation, panic), it queues `ROLLBACK` on the worker
/// together with the permit, so the permit is released only after the rollback ran.
struct OutermostGuard {
    ctx: Arc<TransactionContext>,
    permit: Option<GatePermit>,
    rollback_queued: bool,
}

impl OutermostGuard {
    async fn begin(&mut self) -> Result<(), SqlGateError> {
        let stmt = self.ctx.manager().begin()?;
        if let Err(err) = self.ctx.run_control(&stmt).await {
            // The connection may already be inside a transaction nobody owns.
            let rollback_error = self.rollback_now().await.err();
            return Err(SqlGateError::control_failed(&stmt.sql(), err, rollback_error));
        }
        Ok(())
    }

    async fn commit(mut self) -> Result<(), SqlGateError> {
        if self.ctx.is_poisoned() {
            let rollback_error = self.rollback_now().await.err();
            return Err(SqlGateError::TransactionProtocol {
                message: "transaction aborted after a failed control statement; rolled back"
                    .into(),
                statement: None,
                source: None,
                rollback_error: rollback_error.map(Box::new),
            });
        }

        let stmt = {
            let mut manager = self.ctx.manager();
            match manager.depth() {
                Some(0) => manager.commit(),
                _ => Err(SqlGateError::protocol(format!(
                    "cannot commit the outer transaction in state {:?}",
                    manager.state()
                ))),
            }
        };
        let stmt = match stmt {
            Ok(stmt) => stmt.unwrap_or(ControlStatement::Commit),
            Err(err) => {
                let rollback_error = self.rollback_now().await.err();
                return Err(match err {
                    SqlGateError::TransactionProtocol { message, .. } => {
                        SqlGateError::TransactionProtocol {
                            message,
                            statement: None,
                            source: None,
                            rollback_error: rollback_error.map(Box::new),
                        }
                    }
                    other => other,
                });
            }
        };

        match self.ctx.run_control(&stmt).await {
            Ok(()) => {
                self.release();
                Ok(())
            }
            Err(err) => {
                let rollback_error = self.rollback_now().await.err();
                Err(SqlGateError::control_failed(&stmt.sql(), err, rollback_error))
            }
        }
    }

    async fn rollback(mut self) -> Result<(), SqlGateError> {
        self.rollback_now().await
    }

    async fn rollback_now(&mut self) -> Result<(), SqlGateError> {
        let stmt = self.ctx.manager().abort();
        tracing::trace!(statement = %stmt, "transaction control");
        let pending = match self
            .ctx
            .conn
            .dispatch(CompiledQuery::without_params(stmt.sql()), None)
        {
            Ok(pending) => pending,
            Err(err) => {
                self.release();
                return Err(err);
            }
        };
        self.rollback_queued = true;
        let result = pending.wait().await;
        self.release();
        result
            .map(|_| ())
            .map_err(|err| SqlGateError::control_failed(&stmt.sql(), err, None))
    }

    fn release(&mut self) {
        drop(self.permit.take());
    }
}

impl Drop for OutermostGuard {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        if self.rollback_queued {
            self.ctx.conn.release_after_pending(permit);
            return;
        }
        let stmt = self.ctx.manager().abort();
        tracing::debug!(statement = %stmt, "transaction dropped while open; rolling back");
        self.ctx.conn.send_cleanup(&stmt.sql(), Some(permit));
    }
}

/// Rolls its savepoint back if the nested scope is dropped before finishing.
struct SavepointGuard {
    ctx: Arc<TransactionContext>,
    name: String,
    armed: bool,
}

impl Drop for SavepointGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let rollback = self.ctx.manager().rollback_to(&self.name);
        match rollback {
            Ok(stmt) => {
                tracing::debug!(statement = %stmt, "nested transaction dropped; rolling back");
                self.ctx.conn.send_cleanup(&stmt.sql(), None);
            }
            // Either the outer transaction was already abandoned and its ROLLBACK covers
            // this savepoint, or a sibling is still open on top of it.
            Err(err) => {
                self.ctx.poison();
                tracing::trace!(error = %err, "skipping savepoint rollback");
            }
        }
    }
}
