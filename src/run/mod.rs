//! Test runs and their command scheduling
//!
//! Everything that happens inside the orchestrator for one test run:
//! callsite capture, command validation, the ordered execution chain,
//! missing-await tracking, and the registry used to route worker messages.

pub mod await_tracker;
pub mod callsite;
pub mod command;
pub mod controller;
pub mod executor;
pub mod hooks;
pub mod registry;
pub mod role;
pub mod scheduler;
pub mod test_run;

pub use callsite::Callsite;
pub use command::{ActionOptions, Command};
pub use controller::{ResultHandle, TestController};
pub use executor::{CommandExecutor, LoggingExecutor};
pub use hooks::RequestHookProxy;
pub use registry::{Registration, SessionRegistry};
pub use role::{Role, RoleInitializer};
pub use test_run::{TestRun, TestRunId};
