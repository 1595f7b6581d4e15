//! Request hook proxies
//!
//! Hooks are defined in the worker. The orchestrator keeps a proxy per hook
//! so the interception backend can address it by id; the interception
//! mechanics themselves live outside this crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Orchestrator-side handle for a hook that lives in the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHookProxy {
    pub id: String,
    /// Hook class name, used only for logging
    #[serde(default)]
    pub kind: Option<String>,
    /// Request filter rules as declared by the hook
    #[serde(default)]
    pub request_filter_rules: Vec<Value>,
}

impl RequestHookProxy {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: None,
            request_filter_rules: Vec::new(),
        }
    }
}
