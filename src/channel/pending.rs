//! Outstanding request table
//!
//! Shared by the control channel and the DAP client: allocates request ids,
//! parks a oneshot per request, and fails every waiter at once when the
//! peer goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::common::{Error, Result};

/// Table of requests awaiting a `T` from the peer
pub struct PendingRequests<T> {
    next_id: AtomicU64,
    state: Mutex<State<T>>,
    closed_error: fn(&str) -> Error,
}

struct State<T> {
    waiters: HashMap<u64, oneshot::Sender<Result<T>>>,
    closed: Option<String>,
}

impl<T> PendingRequests<T> {
    /// `closed_error` builds the error handed to waiters after termination
    pub fn new(closed_error: fn(&str) -> Error) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(State {
                waiters: HashMap::new(),
                closed: None,
            }),
            closed_error,
        }
    }

    /// Allocate an id and park a waiter for it
    ///
    /// Fails immediately once the table has been terminated.
    pub fn register(&self) -> Result<(u64, oneshot::Receiver<Result<T>>)> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err((self.closed_error)(reason));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Ok((id, rx))
    }

    /// Deliver a response; false if nobody was waiting for `id`
    pub fn resolve(&self, id: u64, outcome: Result<T>) -> bool {
        let waiter = self.state.lock().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop a waiter whose request never made it onto the wire
    pub fn cancel(&self, id: u64) {
        self.state.lock().waiters.remove(&id);
    }

    /// Fail every outstanding request and refuse new ones
    ///
    /// Returns the number of requests that were rejected. Only the first
    /// call has any effect.
    pub fn terminate(&self, reason: &str) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return 0;
            }
            state.closed = Some(reason.to_string());
            std::mem::take(&mut state.waiters)
        };

        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err((self.closed_error)(reason)));
        }
        count
    }

    /// Await a parked waiter
    pub async fn wait(&self, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                let reason = self
                    .state
                    .lock()
                    .closed
                    .clone()
                    .unwrap_or_else(|| "request abandoned".to_string());
                Err((self.closed_error)(&reason))
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> std::fmt::Debug for PendingRequests<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PendingRequests")
            .field("outstanding", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_resolve_out_of_order() {
        let pending: PendingRequests<Value> = PendingRequests::new(Error::worker_terminated);
        let (first, rx1) = pending.register().unwrap();
        let (second, rx2) = pending.register().unwrap();
        assert_ne!(first, second);

        assert!(pending.resolve(second, Ok(json!("b"))));
        assert!(pending.resolve(first, Ok(json!("a"))));
        assert!(!pending.resolve(first, Ok(json!("again"))));

        assert_eq!(pending.wait(rx1).await.unwrap(), json!("a"));
        assert_eq!(pending.wait(rx2).await.unwrap(), json!("b"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_rejects_all_and_future_requests() {
        let pending: PendingRequests<Value> = PendingRequests::new(Error::worker_terminated);
        let (_, rx1) = pending.register().unwrap();
        let (_, rx2) = pending.register().unwrap();

        assert_eq!(pending.terminate("stdout closed"), 2);
        assert_eq!(pending.terminate("again"), 0);

        for rx in [rx1, rx2] {
            assert!(matches!(
                pending.wait(rx).await,
                Err(Error::WorkerTerminated { .. })
            ));
        }
        assert!(matches!(
            pending.register(),
            Err(Error::WorkerTerminated { reason }) if reason == "stdout closed"
        ));
    }
}
