//! Transaction state machine and the ambient transaction scope.
//!
//! [`TransactionManager`] decides which control statement each transition issues;
//! [`context`] drives it against the connection and guarantees cleanup.

pub(crate) mod context;

use std::fmt;

use crate::error::SqlGateError;

/// Lifecycle of one logical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    /// Open at the given nesting depth; 0 is the outermost level.
    Open(usize),
    Committed,
    RolledBack,
}

/// A statement issued by a transaction transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlStatement {
    Begin,
    Commit,
    Rollback,
    Savepoint(String),
    ReleaseSavepoint(String),
    RollbackToSavepoint(String),
}

impl ControlStatement {
    #[must_use]
    pub fn sql(&self) -> String {
        match self {
            ControlStatement::Begin => "BEGIN".to_owned(),
            ControlStatement::Commit => "COMMIT".to_owned(),
            ControlStatement::Rollback => "ROLLBACK".to_owned(),
            ControlStatement::Savepoint(name) => format!("SAVEPOINT {name}"),
            ControlStatement::ReleaseSavepoint(name) => format!("RELEASE SAVEPOINT {name}"),
            ControlStatement::RollbackToSavepoint(name) => {
                format!("ROLLBACK TO SAVEPOINT {name}")
            }
        }
    }
}

impl ControlStatement {
    /// Name of the savepoint this statement opens, releases, or rolls back to.
    #[must_use]
    pub fn savepoint_name(&self) -> Option<&str> {
        match self {
            ControlStatement::Savepoint(name)
            | ControlStatement::ReleaseSavepoint(name)
            | ControlStatement::RollbackToSavepoint(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ControlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// Per-transaction state machine.
///
/// Savepoint names come from a counter owned by this instance, so two unrelated
/// transactions on the same connection never share a name sequence.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    state: TransactionState,
    savepoints: Vec<String>,
    next_savepoint: u64,
    release_savepoints: bool,
}

impl TransactionManager {
    /// `release_savepoints` makes a nested commit issue `RELEASE SAVEPOINT`; otherwise the
    /// savepoint is folded into the parent silently.
    #[must_use]
    pub fn new(release_savepoints: bool) -> Self {
        Self {
            state: TransactionState::Idle,
            savepoints: Vec::new(),
            next_savepoint: 1,
            release_savepoints,
        }
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Current depth while open.
    #[must_use]
    pub fn depth(&self) -> Option<usize> {
        match self.state {
            TransactionState::Open(depth) => Some(depth),
            _ => None,
        }
    }

    /// `Idle -> Open(0)` issuing `BEGIN`, or `Open(n) -> Open(n+1)` issuing a savepoint.
    ///
    /// # Errors
    /// Returns [`SqlGateError::TransactionProtocol`] from a terminal state.
    pub fn begin(&mut self) -> Result<ControlStatement, SqlGateError> {
        match self.state {
            TransactionState::Idle => {
                self.state = TransactionState::Open(0);
                Ok(ControlStatement::Begin)
            }
            TransactionState::Open(depth) => {
                let name = format!("sp_{}", self.next_savepoint);
                self.next_savepoint += 1;
                self.savepoints.push(name.clone());
                self.state = TransactionState::Open(depth + 1);
                Ok(ControlStatement::Savepoint(name))
            }
            terminal => Err(invalid("begin", terminal)),
        }
    }

    /// `Open(0) -> Committed` issuing `COMMIT`, or `Open(n) -> Open(n-1)` optionally
    /// releasing the savepoint.
    ///
    /// # Errors
    /// Returns [`SqlGateError::TransactionProtocol`] unless open.
    pub fn commit(&mut self) -> Result<Option<ControlStatement>, SqlGateError> {
        match self.state {
            TransactionState::Open(0) => {
                self.state = TransactionState::Committed;
                Ok(Some(ControlStatement::Commit))
            }
            TransactionState::Open(depth) => {
                let name = self.pop_savepoint(depth)?;
                Ok(self
                    .release_savepoints
                    .then_some(ControlStatement::ReleaseSavepoint(name)))
            }
            other => Err(invalid("commit", other)),
        }
    }

    /// `Open(0) -> RolledBack` issuing `ROLLBACK`, or `Open(n) -> Open(n-1)` rolling back
    /// to the savepoint. The parent stays open and can still commit.
    ///
    /// # Errors
    /// Returns [`SqlGateError::TransactionProtocol`] unless open.
    pub fn rollback(&mut self) -> Result<ControlStatement, SqlGateError> {
        match self.state {
            TransactionState::Open(0) => {
                self.state = TransactionState::RolledBack;
                Ok(ControlStatement::Rollback)
            }
            TransactionState::Open(depth) => {
                let name = self.pop_savepoint(depth)?;
                Ok(ControlStatement::RollbackToSavepoint(name))
            }
            other => Err(invalid("rollback", other)),
        }
    }

    /// Finish the nested scope that opened savepoint `name`, optionally releasing it.
    ///
    /// # Errors
    /// Returns [`SqlGateError::TransactionProtocol`] unless `name` is the innermost open
    /// savepoint; the state is left untouched in that case.
    pub fn release(&mut self, name: &str) -> Result<Option<ControlStatement>, SqlGateError> {
        let depth = self.innermost(name, "release")?;
        let name = self.pop_savepoint(depth)?;
        Ok(self
            .release_savepoints
            .then_some(ControlStatement::ReleaseSavepoint(name)))
    }

    /// Undo the nested scope that opened savepoint `name`.
    ///
    /// # Errors
    /// Returns [`SqlGateError::TransactionProtocol`] unless `name` is the innermost open
    /// savepoint; the state is left untouched in that case.
    pub fn rollback_to(&mut self, name: &str) -> Result<ControlStatement, SqlGateError> {
        let depth = self.innermost(name, "roll back")?;
        let name = self.pop_savepoint(depth)?;
        Ok(ControlStatement::RollbackToSavepoint(name))
    }

    /// Drop savepoint `name` after its `SAVEPOINT` statement failed to take effect.
    pub(crate) fn forget_savepoint(&mut self, name: &str) {
        if let TransactionState::Open(depth) = self.state
            && depth > 0
            && let Some(pos) = self.savepoints.iter().rposition(|sp| sp == name)
        {
            self.savepoints.remove(pos);
            self.state = TransactionState::Open(depth - 1);
        }
    }

    /// Abandon the whole transaction from any state, returning the `ROLLBACK` to issue.
    pub(crate) fn abort(&mut self) -> ControlStatement {
        self.savepoints.clear();
        self.state = TransactionState::RolledBack;
        ControlStatement::Rollback
    }

    fn innermost(&self, name: &str, action: &str) -> Result<usize, SqlGateError> {
        let depth = match self.state {
            TransactionState::Open(depth) if depth > 0 => depth,
            other => {
                return Err(SqlGateError::protocol(format!(
                    "cannot {action} savepoint {name} in state {other:?}"
                )));
            }
        };
        match self.savepoints.last() {
            Some(top) if top == name => Ok(depth),
            Some(top) => Err(SqlGateError::protocol(format!(
                "cannot {action} savepoint {name} while {top} is still open inside it"
            ))),
            None => Err(SqlGateError::protocol(format!("savepoint {name} is not open"))),
        }
    }

    fn pop_savepoint(&mut self, depth: usize) -> Result<String, SqlGateError> {
        let name = self
            .savepoints
            .pop()
            .ok_or_else(|| SqlGateError::protocol(format!("no savepoint recorded at depth {depth}")))?;
        self.state = TransactionState::Open(depth - 1);
        Ok(name)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(false)
    }
}

fn invalid(transition: &str, state: TransactionState) -> SqlGateError {
    SqlGateError::protocol(format!("cannot {transition} a transaction in state {state:?}"))
}
