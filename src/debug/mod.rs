//! Step-debugger integration
//!
//! When the worker stops in a debugger, every live test run is paused too;
//! when it resumes, the runs are released.

pub mod bridge;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::Result;

pub use bridge::DebugBridge;

/// Notification from an attached step debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerEvent {
    /// Execution stopped; `top_frame_path` is the source of the innermost frame
    Paused { top_frame_path: Option<String> },
    Resumed,
}

/// A debugger attached to the worker process
#[async_trait]
pub trait StepDebugger: Send + Sync {
    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn step_out(&self) -> Result<()>;

    /// Release the debugger, leaving the worker running
    async fn detach(&self) -> Result<()> {
        Ok(())
    }

    /// Take the event stream (can only be called once)
    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<DebuggerEvent>>;
}
