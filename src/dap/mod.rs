//! Debug Adapter Protocol (DAP) implementation
//!
//! Client side of DAP, used to follow the worker process in a step
//! debugger.

pub mod client;
pub mod types;

pub use client::DapDebugger;
