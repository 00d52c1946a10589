use std::fmt;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::SqlGateError;

/// Single-permit gate in front of the one engine connection.
///
/// Waiters are served in FIFO order. Waiting is cancellable: dropping the
/// `acquire` future leaves the queue without side effects.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

/// Proof of exclusive access to the connection. Dropping it releases the gate.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the permit.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConnectionError`] once the gate has been closed.
    pub async fn acquire(&self) -> Result<GatePermit, SqlGateError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| closed())?;
        Ok(GatePermit { _permit: permit })
    }

    /// Take the permit only if it is free right now.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConnectionError`] once the gate has been closed.
    pub fn try_acquire(&self) -> Result<Option<GatePermit>, SqlGateError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(GatePermit { _permit: permit })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(closed()),
        }
    }

    /// True when nobody holds the permit.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.semaphore.available_permits() == 1
    }

    /// Fail every current and future waiter. Permits already handed out stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("free", &self.is_free())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GatePermit")
    }
}

fn closed() -> SqlGateError {
    SqlGateError::ConnectionError("connection gate closed".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn permit_is_exclusive_until_dropped() {
        let gate = ConcurrencyGate::new();
        let permit = gate.acquire().await.unwrap();
        assert!(!gate.is_free());
        assert!(gate.try_acquire().unwrap().is_none());
        drop(permit);
        assert!(gate.is_free());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_waiter_leaves_gate_usable() {
        let gate = ConcurrencyGate::new();
        let held = gate.acquire().await.unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;
        assert!(waited.is_err());
        drop(held);
        assert!(gate.try_acquire().unwrap().is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn waiters_are_served_in_order() {
        let gate = ConcurrencyGate::new();
        let held = gate.acquire().await.unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let gate = gate.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                order.lock().unwrap().push(i);
            }));
            tokio::task::yield_now().await;
        }
        drop(held);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn closed_gate_rejects_waiters() {
        let gate = ConcurrencyGate::new();
        gate.close();
        assert!(gate.acquire().await.is_err());
        assert!(gate.try_acquire().is_err());
    }
}
