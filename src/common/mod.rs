//! Common utilities shared between the orchestrator and worker sides

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorPayload, Result};
