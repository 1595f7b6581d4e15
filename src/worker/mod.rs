//! The worker process that compiles and executes test code

pub mod debug_info;
pub mod descriptors;
pub mod manager;
pub mod routes;

pub use debug_info::DebugInfo;
pub use descriptors::{FixtureDescriptor, RemotePhase, TestDescriptor, TestSuite};
pub use manager::WorkerProcessManager;
pub use routes::WorkerEvent;
