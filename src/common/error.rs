//! Error types for the orchestration core
//!
//! Messages name the failing component and, where one exists, the user
//! callsite that triggered the failure.

use std::io;
use thiserror::Error;

use crate::run::callsite::Callsite;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // === Command Errors ===
    #[error("Invalid '{}' call at {callsite}: {message}", callsite.method())]
    Validation {
        message: String,
        callsite: Box<Callsite>,
    },

    #[error("Command '{command}' failed: {message}")]
    Execution { command: String, message: String },

    // === Channel Errors ===
    #[error("Control channel transport error: {0}")]
    Transport(String),

    #[error("Control channel protocol error: {0}")]
    Protocol(String),

    #[error("Worker process terminated: {reason}")]
    WorkerTerminated { reason: String },

    #[error("Worker request '{method}' failed ({code}): {message}")]
    RemoteFailure {
        method: String,
        code: String,
        message: String,
    },

    // === Worker Errors ===
    #[error("Failed to compile test files: {0}")]
    Compilation(String),

    #[error("Unhandled error in '{hook}' hook: {message}")]
    UnhandledHook { hook: String, message: String },

    #[error("Failed to spawn worker process: {0}")]
    WorkerSpawnFailed(String),

    #[error("Worker handshake timed out after {0} seconds")]
    HandshakeTimeout(u64),

    #[error("Worker exited before the handshake completed (code {0:?})")]
    WorkerExitedEarly(Option<i32>),

    #[error("Worker executable not found. Set [worker] path in the config or pass --worker")]
    WorkerNotFound,

    // === Debugger Errors ===
    #[error("Step debugger error: {0}")]
    Debugger(String),

    #[error("DAP request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error attributed to a callsite
    pub fn validation(callsite: Callsite, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            callsite: Box::new(callsite),
        }
    }

    /// Create an execution error for a command kind
    pub fn execution(command: &str, message: &str) -> Self {
        Self::Execution {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a worker terminated error
    pub fn worker_terminated(reason: &str) -> Self {
        Self::WorkerTerminated {
            reason: reason.to_string(),
        }
    }

    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the worker is gone and no further test can run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::WorkerTerminated { .. }
                | Error::WorkerSpawnFailed(_)
                | Error::HandshakeTimeout(_)
                | Error::WorkerExitedEarly(_)
                | Error::Compilation(_)
        )
    }

    /// Attach the method name to an error payload received from the peer
    pub fn from_payload(method: &str, payload: ErrorPayload) -> Self {
        match payload.code.as_str() {
            "WORKER_TERMINATED" => Error::WorkerTerminated {
                reason: payload.message,
            },
            "COMPILATION_ERROR" => Error::Compilation(payload.message),
            "UNHANDLED_HOOK" => Error::UnhandledHook {
                hook: method.to_string(),
                message: payload.message,
            },
            _ => Error::RemoteFailure {
                method: method.to_string(),
                code: payload.code,
                message: payload.message,
            },
        }
    }
}

/// Wire-serializable error carried in `{id, error}` responses
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<&Error> for ErrorPayload {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::Execution { .. } => "EXECUTION_ERROR",
            Error::WorkerTerminated { .. } => "WORKER_TERMINATED",
            Error::Compilation(_) => "COMPILATION_ERROR",
            Error::UnhandledHook { .. } => "UNHANDLED_HOOK",
            Error::RemoteFailure { code, .. } => code.as_str(),
            Error::Protocol(_) | Error::Json(_) => "PROTOCOL_ERROR",
            _ => "INTERNAL_ERROR",
        };

        Self::new(code, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trips_fatal_kinds() {
        let err = Error::worker_terminated("stdout closed");
        let payload = ErrorPayload::from(&err);
        assert_eq!(payload.code, "WORKER_TERMINATED");

        let back = Error::from_payload("run-test", payload);
        assert!(matches!(back, Error::WorkerTerminated { .. }));
        assert!(back.is_fatal());
    }

    #[test]
    fn test_unknown_code_becomes_remote_failure() {
        let payload = ErrorPayload::new("TEST_FAILED", "expected 1 to equal 2");
        match Error::from_payload("run-test", payload) {
            Error::RemoteFailure {
                method,
                code,
                message,
            } => {
                assert_eq!(method, "run-test");
                assert_eq!(code, "TEST_FAILED");
                assert_eq!(message, "expected 1 to equal 2");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_execution_error_is_not_fatal() {
        assert!(!Error::execution("click", "element not found").is_fatal());
    }
}
