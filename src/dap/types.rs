//! DAP message types
//!
//! The subset of the Debug Adapter Protocol needed to follow pauses in the
//! worker and step out of orchestrator-internal frames.
//! See: https://microsoft.github.io/debug-adapter-protocol/specification

use serde::{Deserialize, Serialize};
use serde_json::Value;

// === Base Protocol Messages ===

/// DAP request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl RequestMessage {
    pub fn new(seq: u64, command: &str, arguments: Option<Value>) -> Self {
        Self {
            seq,
            message_type: "request".to_string(),
            command: command.to_string(),
            arguments,
        }
    }
}

/// DAP response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub request_seq: u64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

// === Request Arguments ===

/// Initialize request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    #[serde(default = "default_true")]
    pub lines_start_at1: bool,
    #[serde(default = "default_true")]
    pub columns_start_at1: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_format: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for InitializeArguments {
    fn default() -> Self {
        Self {
            client_id: Some("e2e-conductor".to_string()),
            client_name: Some("E2E Conductor".to_string()),
            adapter_id: "worker".to_string(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: Some("path".to_string()),
        }
    }
}

/// Attach request arguments for an inspector endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachArguments {
    pub address: String,
    pub port: u16,
    /// Let the worker run past its start-up pause once attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_attach: Option<bool>,
}

/// Continue request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueArguments {
    pub thread_id: i64,
    #[serde(default)]
    pub single_thread: bool,
}

/// Step request arguments (stepOut)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepArguments {
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
}

/// Pause request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseArguments {
    pub thread_id: i64,
}

/// StackTrace request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_frame: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<i64>,
}

/// Disconnect request arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    #[serde(default)]
    pub restart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminate_debuggee: Option<bool>,
}

// === Response Bodies ===

/// Capabilities returned by initialize response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub supports_configuration_done_request: bool,
    #[serde(default)]
    pub supports_terminate_request: bool,
}

/// StackTrace response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

// === Common Types ===

/// Source location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Stack frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: u32,
    pub column: u32,
}

// === Event Bodies ===

/// Stopped event body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub all_threads_stopped: bool,
}

// === Parsed Events ===

/// Parsed DAP event
#[derive(Debug, Clone)]
pub enum Event {
    Initialized,
    Stopped(StoppedEventBody),
    Continued { thread_id: i64 },
    Terminated,
    Unknown { event: String },
}

impl Event {
    /// Parse an event from an EventMessage
    pub fn from_message(msg: &EventMessage) -> Self {
        match msg.event.as_str() {
            "initialized" => Event::Initialized,
            "stopped" => msg
                .body
                .as_ref()
                .and_then(|body| serde_json::from_value(body.clone()).ok())
                .map(Event::Stopped)
                .unwrap_or_else(|| Event::Unknown {
                    event: msg.event.clone(),
                }),
            "continued" => {
                let thread_id = msg
                    .body
                    .as_ref()
                    .and_then(|b| b.get("threadId"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                Event::Continued { thread_id }
            }
            "exited" | "terminated" => Event::Terminated,
            _ => Event::Unknown {
                event: msg.event.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, body: Option<Value>) -> EventMessage {
        EventMessage {
            seq: 1,
            message_type: "event".to_string(),
            event: name.to_string(),
            body,
        }
    }

    #[test]
    fn test_parse_stopped_event() {
        let msg = event(
            "stopped",
            Some(json!({"reason": "breakpoint", "threadId": 3, "allThreadsStopped": true})),
        );
        match Event::from_message(&msg) {
            Event::Stopped(body) => {
                assert_eq!(body.reason, "breakpoint");
                assert_eq!(body.thread_id, Some(3));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_stopped_without_body_is_unknown() {
        assert!(matches!(
            Event::from_message(&event("stopped", None)),
            Event::Unknown { .. }
        ));
        assert!(matches!(
            Event::from_message(&event("exited", None)),
            Event::Terminated
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = RequestMessage::new(4, "stepOut", None);
        assert_eq!(
            serde_json::to_value(request).unwrap(),
            json!({"seq": 4, "type": "request", "command": "stepOut"})
        );
    }
}
