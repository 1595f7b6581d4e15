//! Roles: reusable session initializers
//!
//! A role is addressed by its own id. Its initializer is invoked at most
//! once per test run, on the first `use-role` that activates it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::Result;

use super::test_run::TestRunId;

/// Runs a role's initialization on behalf of a test run
#[async_trait]
pub trait RoleInitializer: Send + Sync + fmt::Debug {
    async fn initialize(&self, test_run_id: &TestRunId) -> Result<Value>;
}

/// A reusable authenticated session
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub login_page: Option<String>,
    #[serde(default)]
    pub options: Value,
    #[serde(skip)]
    pub initializer: Option<Arc<dyn RoleInitializer>>,
}

impl Role {
    pub fn new(id: impl Into<String>, login_page: Option<String>, options: Value) -> Self {
        Self {
            id: id.into(),
            login_page,
            options,
            initializer: None,
        }
    }

    pub fn with_initializer(mut self, initializer: Arc<dyn RoleInitializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role")
            .field("id", &self.id)
            .field("login_page", &self.login_page)
            .field("has_initializer", &self.initializer.is_some())
            .finish()
    }
}
