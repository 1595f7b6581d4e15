//! Per-run execution chain
//!
//! Commands are appended to an unbounded queue drained by a single task, so
//! execution `i` starts only after execution `i - 1` has settled. Enqueueing
//! never suspends the caller; only awaiting the returned [`Settlement`]
//! does. A failed link settles its own handle and the chain moves on.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::common::{Error, Result};

use super::await_tracker::AwaitTracker;
use super::callsite::Callsite;
use super::command::Command;
use super::executor::CommandExecutor;

/// One pending execution
struct Link {
    command: Command,
    callsite: Callsite,
    settle: oneshot::Sender<Result<Value>>,
}

/// Eventual outcome of one chained command
#[derive(Debug)]
pub struct Settlement {
    receiver: oneshot::Receiver<Result<Value>>,
}

impl Settlement {
    /// A settlement that is already resolved
    pub fn ready(result: Result<Value>) -> Self {
        let (settle, receiver) = oneshot::channel();
        let _ = settle.send(result);
        Self { receiver }
    }
}

impl Future for Settlement {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|settled| {
            settled.unwrap_or_else(|_| {
                Err(Error::Internal(
                    "execution chain stopped before the action settled".to_string(),
                ))
            })
        })
    }
}

/// Ordered command queue for one test run
pub struct ActionScheduler {
    queue: mpsc::UnboundedSender<Link>,
    tracker: AwaitTracker,
    executor: Arc<dyn CommandExecutor>,
}

impl ActionScheduler {
    /// Start the chain; must be called inside a tokio runtime
    pub fn new(test_run: &str, executor: Arc<dyn CommandExecutor>) -> Self {
        let (queue, links) = mpsc::unbounded_channel();

        tokio::spawn(drain_chain(test_run.to_string(), links, executor.clone()));

        Self {
            queue,
            tracker: AwaitTracker::new(),
            executor,
        }
    }

    pub fn tracker(&self) -> &AwaitTracker {
        &self.tracker
    }

    /// Validate and append a command to the chain
    ///
    /// Validation failures surface here, synchronously, tagged with the
    /// callsite; the command never enters the chain. On success the
    /// callsite is tracked until its result is observed. Immediate
    /// commands are rejected; they go through [`Self::execute_immediate`].
    pub fn enqueue(&self, callsite: Callsite, command: Command) -> Result<Settlement> {
        if command.is_immediate() {
            return Err(Error::validation(
                callsite,
                format!("'{}' cannot be chained", command.kind()),
            ));
        }
        command
            .validate()
            .map_err(|message| Error::validation(callsite.clone(), message))?;

        self.tracker.track(&callsite);
        Ok(self.append(callsite, command))
    }

    /// Append an internal command that nobody is expected to await
    pub fn enqueue_untracked(&self, callsite: Callsite, command: Command) -> Settlement {
        self.append(callsite, command)
    }

    /// Run an immediate command against the executor, bypassing the chain
    pub fn execute_immediate(&self, callsite: &Callsite, command: &Command) -> Result<Value> {
        if !command.is_immediate() {
            return Err(Error::validation(
                callsite.clone(),
                format!("'{}' must run in the execution chain", command.kind()),
            ));
        }
        command
            .validate()
            .map_err(|message| Error::validation(callsite.clone(), message))?;

        self.executor.execute_command_sync(command, callsite)
    }

    fn append(&self, callsite: Callsite, command: Command) -> Settlement {
        let (settle, receiver) = oneshot::channel();
        let link = Link {
            command,
            callsite,
            settle,
        };

        if let Err(mpsc::error::SendError(link)) = self.queue.send(link) {
            let _ = link.settle.send(Err(Error::Internal(
                "execution chain is closed".to_string(),
            )));
        }

        Settlement { receiver }
    }
}

async fn drain_chain(
    test_run: String,
    mut links: mpsc::UnboundedReceiver<Link>,
    executor: Arc<dyn CommandExecutor>,
) {
    while let Some(link) = links.recv().await {
        tracing::debug!(
            test_run = %test_run,
            command = link.command.kind(),
            location = %link.callsite,
            "Executing chained command"
        );

        let result = executor.execute_command(&link.command, &link.callsite).await;

        if let Err(e) = &result {
            tracing::debug!(test_run = %test_run, command = link.command.kind(), error = %e, "Command failed");
        }

        // The receiver may be gone if the handle was dropped unobserved
        let _ = link.settle.send(result);
    }

    tracing::trace!(test_run = %test_run, "Execution chain closed");
}
