//! Command executor contract
//!
//! The browser automation backend sits behind [`CommandExecutor`]. Commands
//! reaching it are already validated.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::common::Result;

use super::callsite::Callsite;
use super::command::Command;

/// Backend that performs commands against the system under test
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a chained command
    async fn execute_command(&self, command: &Command, callsite: &Callsite) -> Result<Value>;

    /// Execute an immediate command without queuing
    fn execute_command_sync(&self, command: &Command, callsite: &Callsite) -> Result<Value>;
}

/// Stand-in backend that logs each command and reports success
///
/// Used by the CLI, which has no automation backend of its own.
#[derive(Debug, Default, Clone)]
pub struct LoggingExecutor {
    browser: String,
}

impl LoggingExecutor {
    pub fn new(browser: impl Into<String>) -> Self {
        Self {
            browser: browser.into(),
        }
    }
}

#[async_trait]
impl CommandExecutor for LoggingExecutor {
    async fn execute_command(&self, command: &Command, callsite: &Callsite) -> Result<Value> {
        tracing::info!(
            browser = %self.browser,
            command = command.kind(),
            location = %callsite,
            "Executing command"
        );

        if let Command::Wait { timeout } = command {
            tokio::time::sleep(std::time::Duration::from_millis(*timeout)).await;
        }

        Ok(json!({ "command": command.kind() }))
    }

    fn execute_command_sync(&self, command: &Command, callsite: &Callsite) -> Result<Value> {
        tracing::debug!(
            browser = %self.browser,
            command = command.kind(),
            location = %callsite,
            "Executing immediate command"
        );

        Ok(match command {
            Command::GetNativeDialogHistory | Command::GetBrowserConsoleMessages => json!([]),
            _ => Value::Null,
        })
    }
}
