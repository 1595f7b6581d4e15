//! Control channel message types
//!
//! Every frame is one JSON object. Requests carry `id` and `method`,
//! notifications carry only `method`, responses carry `id` with either
//! `result` or `error`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, ErrorPayload, Result};
use crate::run::callsite::RemoteLocation;
use crate::run::command::Command;
use crate::run::hooks::RequestHookProxy;
use crate::run::test_run::TestRunId;

/// Error code sent back for names outside the vocabulary
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";

/// Closed set of message names understood on the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    // Orchestrator → worker
    GetTests,
    RunTest,
    CleanUp,
    Exit,
    // Worker → orchestrator
    TestFileAdded,
    Debug,
    ExecuteCommand,
    UseRole,
    AddRequestHooks,
    RemoveRequestHooks,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::GetTests,
        Method::RunTest,
        Method::CleanUp,
        Method::Exit,
        Method::TestFileAdded,
        Method::Debug,
        Method::ExecuteCommand,
        Method::UseRole,
        Method::AddRequestHooks,
        Method::RemoveRequestHooks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::GetTests => "get-tests",
            Method::RunTest => "run-test",
            Method::CleanUp => "clean-up",
            Method::Exit => "exit",
            Method::TestFileAdded => "test-file-added",
            Method::Debug => "debug",
            Method::ExecuteCommand => "execute-command",
            Method::UseRole => "use-role",
            Method::AddRequestHooks => "add-request-hooks",
            Method::RemoveRequestHooks => "remove-request-hooks",
        }
    }

    pub fn parse(name: &str) -> Option<Method> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw frame as it appears on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Envelope {
    pub fn request(id: u64, method: &str, payload: Value) -> Self {
        Self {
            id: Some(id),
            method: Some(method.to_string()),
            payload,
            ..Default::default()
        }
    }

    pub fn notification(method: &str, payload: Value) -> Self {
        Self {
            method: Some(method.to_string()),
            payload,
            ..Default::default()
        }
    }

    pub fn response(id: u64, outcome: std::result::Result<Value, ErrorPayload>) -> Self {
        match outcome {
            Ok(result) => Self {
                id: Some(id),
                result: Some(result),
                ..Default::default()
            },
            Err(error) => Self {
                id: Some(id),
                error: Some(error),
                ..Default::default()
            },
        }
    }

    /// Decode and classify one frame
    pub fn parse(json: &str) -> Result<Message> {
        let envelope: Envelope = serde_json::from_str(json)
            .map_err(|e| Error::Protocol(format!("Invalid message: {}", e)))?;
        envelope.classify()
    }

    pub fn classify(self) -> Result<Message> {
        match (self.id, self.method) {
            (Some(id), Some(method)) => Ok(Message::Request {
                id,
                method,
                payload: self.payload,
            }),
            (None, Some(method)) => Ok(Message::Notification {
                method,
                payload: self.payload,
            }),
            (Some(id), None) => Ok(Message::Response {
                id,
                outcome: match self.error {
                    Some(error) => Err(error),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                },
            }),
            (None, None) => Err(Error::Protocol(
                "Message has neither id nor method".to_string(),
            )),
        }
    }
}

/// Classified inbound frame
#[derive(Debug)]
pub enum Message {
    Request {
        id: u64,
        method: String,
        payload: Value,
    },
    Notification {
        method: String,
        payload: Value,
    },
    Response {
        id: u64,
        outcome: std::result::Result<Value, ErrorPayload>,
    },
}

// === Payloads ===

/// `get-tests` arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTestsParams {
    pub sources: Vec<String>,
}

/// Fixture as reported by `get-tests`; phase fields flag presence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFixture {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub before_fn: bool,
    #[serde(default)]
    pub after_fn: bool,
    #[serde(default)]
    pub before_each_fn: bool,
    #[serde(default)]
    pub after_each_fn: bool,
}

/// Test as reported by `get-tests`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTest {
    pub id: String,
    pub name: String,
    pub fixture: WireFixture,
    #[serde(default)]
    pub before_fn: bool,
    #[serde(default)]
    pub after_fn: bool,
    #[serde(default)]
    pub request_hooks: Vec<RequestHookProxy>,
}

/// Which kind of entity a `run-test` index refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Tests,
    Fixtures,
    Roles,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::Tests => "tests",
            Actor::Fixtures => "fixtures",
            Actor::Roles => "roles",
        }
    }
}

/// `run-test` arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTestParams {
    pub idx: String,
    pub actor: Actor,
    pub func: String,
    pub test_run_id: Option<TestRunId>,
}

/// `execute-command` arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCommandParams {
    pub id: TestRunId,
    pub command: Command,
    #[serde(default)]
    pub callsite: Option<RemoteLocation>,
}

/// Role as described by the worker; `init_fn` flags an initializer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRole {
    pub id: String,
    #[serde(default)]
    pub login_page: Option<String>,
    #[serde(default)]
    pub init_fn: bool,
    #[serde(default)]
    pub options: Value,
}

/// `use-role` arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseRoleParams {
    pub id: TestRunId,
    pub role: WireRole,
}

/// `add-request-hooks` / `remove-request-hooks` arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHooksParams {
    pub id: TestRunId,
    pub hooks: Vec<RequestHookProxy>,
}

/// `debug` arguments; no id means every run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugParams {
    #[serde(default)]
    pub id: Option<TestRunId>,
}

/// `test-file-added` arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFileAddedParams {
    pub filename: String,
}
