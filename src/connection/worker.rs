use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use tokio::sync::oneshot;

use crate::engine::{Engine, QueryResult};
use crate::error::{EngineError, SqlGateError};
use crate::gate::GatePermit;
use crate::types::RowValues;

pub(super) type Opener = Box<dyn FnOnce() -> Result<Box<dyn Engine>, EngineError> + Send>;

pub(super) enum Command {
    /// Run a statement and reply. A carried permit is released before the reply is sent.
    Query {
        sql: String,
        params: Vec<RowValues>,
        permit: Option<GatePermit>,
        respond_to: oneshot::Sender<Result<QueryResult, EngineError>>,
    },
    /// Run a statement nobody waits for; failures are logged.
    Cleanup {
        sql: String,
        permit: Option<GatePermit>,
    },
    /// Release a permit after everything queued before it has run.
    Release { permit: GatePermit },
    Shutdown {
        respond_to: Option<oneshot::Sender<Result<(), EngineError>>>,
    },
}

pub(super) struct Worker {
    sender: Sender<Command>,
}

impl Worker {
    /// Spawn the worker thread, open the engine on it, and wait until it is ready.
    pub(super) async fn spawn(opener: Opener) -> Result<Self, SqlGateError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = oneshot::channel();
        thread::Builder::new()
            .name("sql-gate-worker".into())
            .spawn(move || match opener() {
                Ok(engine) => {
                    let _ = ready_tx.send(Ok(()));
                    run_worker(engine, &receiver);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(spawn_error)?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self { sender }),
            Ok(Err(err)) => Err(SqlGateError::ConnectionError(format!(
                "failed to open engine: {err}"
            ))),
            Err(_) => Err(SqlGateError::ConnectionError(
                "engine worker exited during startup".into(),
            )),
        }
    }

    /// Spawn the worker around an engine that is already live.
    pub(super) fn adopt(engine: Box<dyn Engine>) -> Result<Self, SqlGateError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        thread::Builder::new()
            .name("sql-gate-worker".into())
            .spawn(move || run_worker(engine, &receiver))
            .map_err(spawn_error)?;
        Ok(Self { sender })
    }

    pub(super) fn send(&self, command: Command) -> Result<(), SqlGateError> {
        self.sender
            .send(command)
            .map_err(|_| SqlGateError::ConnectionError("engine worker closed".into()))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown { respond_to: None });
    }
}

fn spawn_error(err: std::io::Error) -> SqlGateError {
    SqlGateError::ConnectionError(format!("failed to spawn engine worker thread: {err}"))
}

fn run_worker(mut engine: Box<dyn Engine>, receiver: &Receiver<Command>) {
    let mut shutdown_reply = None;

    while let Ok(command) = receiver.recv() {
        match command {
            Command::Query {
                sql,
                params,
                permit,
                respond_to,
            } => {
                let outcome = engine.query(&sql, &params);
                drop(permit);
                let _ = respond_to.send(outcome);
            }
            Command::Cleanup { sql, permit } => {
                if let Err(err) = engine.query(&sql, &[]) {
                    tracing::warn!(statement = %sql, error = %err, "cleanup statement failed");
                }
                drop(permit);
            }
            Command::Release { permit } => drop(permit),
            Command::Shutdown { respond_to } => {
                shutdown_reply = respond_to;
                break;
            }
        }
    }

    let closed = engine.close();
    if let Err(err) = &closed {
        tracing::warn!(error = %err, "engine close failed");
    }
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(closed);
    }
}
