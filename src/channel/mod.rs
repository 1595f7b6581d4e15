//! Orchestrator ⇄ worker control channel
//!
//! Content-Length framed JSON over the worker's stdio, with responses
//! carried on a local-socket side channel.

pub mod codec;
pub mod pending;
pub mod protocol;
pub mod transmitter;
pub mod transport;

pub use protocol::Method;
pub use transmitter::ControlChannel;
pub use transport::{Duplex, Transport};
