//! Conductor - orchestration core for browser end-to-end tests
//!
//! The orchestrator talks to a worker process that compiles and executes
//! test code. Browser actions requested by tests are serialized per test run
//! and tracked so that actions the test never awaited can be reported.

pub mod channel;
pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod debug;
pub mod run;
pub mod runner;
pub mod worker;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use run::{Callsite, Command, SessionRegistry, TestRun, TestRunId};
