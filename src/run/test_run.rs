//! Test run state
//!
//! A [`TestRun`] is one test executing in one browser. It owns the run's
//! execution chain, user context storage, request hooks and role state.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{Error, Result};

use super::callsite::Callsite;
use super::command::Command;
use super::controller::TestController;
use super::executor::CommandExecutor;
use super::hooks::RequestHookProxy;
use super::role::Role;
use super::scheduler::{ActionScheduler, Settlement};

/// Identifier used to address a run from the worker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestRunId(String);

impl TestRunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TestRunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TestRunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TestRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One test executing in one browser
pub struct TestRun {
    id: TestRunId,
    browser: String,
    scheduler: ActionScheduler,
    ctx: Mutex<Map<String, Value>>,
    fixture_ctx: Arc<Mutex<Map<String, Value>>>,
    debugging: AtomicBool,
    request_hooks: Mutex<BTreeMap<String, RequestHookProxy>>,
    active_role: Mutex<Option<Role>>,
    initialized_roles: Mutex<HashSet<String>>,
}

impl TestRun {
    /// Create a run whose commands are performed by `backend`
    ///
    /// Must be called inside a tokio runtime; the execution chain task is
    /// spawned here.
    pub fn new(id: TestRunId, browser: &str, backend: Arc<dyn CommandExecutor>) -> Arc<Self> {
        Self::with_fixture_ctx(id, browser, backend, Arc::default())
    }

    /// Create a run sharing fixture context with sibling runs
    pub fn with_fixture_ctx(
        id: TestRunId,
        browser: &str,
        backend: Arc<dyn CommandExecutor>,
        fixture_ctx: Arc<Mutex<Map<String, Value>>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|run: &Weak<TestRun>| {
            let executor = Arc::new(RunExecutor {
                run: run.clone(),
                backend,
            });

            Self {
                scheduler: ActionScheduler::new(id.as_str(), executor),
                id,
                browser: browser.to_string(),
                ctx: Mutex::new(Map::new()),
                fixture_ctx,
                debugging: AtomicBool::new(false),
                request_hooks: Mutex::new(BTreeMap::new()),
                active_role: Mutex::new(None),
                initialized_roles: Mutex::new(HashSet::new()),
            }
        })
    }

    pub fn id(&self) -> &TestRunId {
        &self.id
    }

    pub fn browser(&self) -> &str {
        &self.browser
    }

    pub fn scheduler(&self) -> &ActionScheduler {
        &self.scheduler
    }

    /// User-facing API bound to this run
    pub fn controller(self: &Arc<Self>) -> TestController {
        TestController::new(self.clone())
    }

    /// Append a command requested by code running in the worker
    ///
    /// The router awaits the result itself, so the callsite is not tracked
    /// for missing awaits. Immediate commands settle without queueing.
    pub fn execute_command(&self, callsite: Callsite, command: Command) -> Result<Settlement> {
        command
            .validate()
            .map_err(|message| Error::validation(callsite.clone(), message))?;

        if command.is_immediate() {
            let result = self.scheduler.execute_immediate(&callsite, &command);
            return Ok(Settlement::ready(result));
        }
        Ok(self.scheduler.enqueue_untracked(callsite, command))
    }

    // === Debugging ===

    pub fn is_debugging(&self) -> bool {
        self.debugging.load(Ordering::SeqCst)
    }

    /// Flag the run as debugging and inject a debug command
    ///
    /// Returns false if the run was already debugging; no second command is
    /// injected in that case.
    pub fn begin_debugging(&self) -> bool {
        if self.debugging.swap(true, Ordering::SeqCst) {
            return false;
        }

        tracing::info!(test_run = %self.id, "Test run paused in debugger");
        drop(
            self.scheduler
                .enqueue_untracked(Callsite::remote("debug", None), Command::Debug),
        );
        true
    }

    pub fn end_debugging(&self) {
        self.debugging.store(false, Ordering::SeqCst);
    }

    // === Context storage ===

    pub fn ctx(&self) -> Map<String, Value> {
        self.ctx.lock().clone()
    }

    pub fn set_ctx(&self, ctx: Map<String, Value>) {
        *self.ctx.lock() = ctx;
    }

    pub fn fixture_ctx(&self) -> Map<String, Value> {
        self.fixture_ctx.lock().clone()
    }

    // === Request hooks ===

    pub fn add_request_hook(&self, hook: RequestHookProxy) {
        tracing::debug!(test_run = %self.id, hook = %hook.id, "Adding request hook");
        self.request_hooks.lock().insert(hook.id.clone(), hook);
    }

    pub fn remove_request_hook(&self, id: &str) -> Option<RequestHookProxy> {
        tracing::debug!(test_run = %self.id, hook = id, "Removing request hook");
        self.request_hooks.lock().remove(id)
    }

    pub fn request_hooks(&self) -> Vec<RequestHookProxy> {
        self.request_hooks.lock().values().cloned().collect()
    }

    // === Roles ===

    pub fn active_role(&self) -> Option<Role> {
        self.active_role.lock().clone()
    }

    async fn activate_role(
        &self,
        backend: &dyn CommandExecutor,
        command: &Command,
        role: &Role,
        callsite: &Callsite,
    ) -> Result<Value> {
        if let Some(initializer) = &role.initializer {
            let first_use = self.initialized_roles.lock().insert(role.id.clone());

            if first_use {
                tracing::debug!(test_run = %self.id, role = %role.id, "Initializing role");
                if let Err(e) = initializer.initialize(&self.id).await {
                    self.initialized_roles.lock().remove(&role.id);
                    return Err(e);
                }
            }
        }

        let result = backend.execute_command(command, callsite).await?;
        *self.active_role.lock() = Some(role.clone());
        Ok(result)
    }

    /// Report leftover unawaited callsites at run end
    pub fn finish(&self) -> Vec<Callsite> {
        self.scheduler.tracker().report(self.id.as_str())
    }
}

impl fmt::Debug for TestRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRun")
            .field("id", &self.id)
            .field("browser", &self.browser)
            .field("debugging", &self.is_debugging())
            .finish()
    }
}

/// Chain executor that applies run-level semantics before the backend
struct RunExecutor {
    run: Weak<TestRun>,
    backend: Arc<dyn CommandExecutor>,
}

#[async_trait]
impl CommandExecutor for RunExecutor {
    async fn execute_command(&self, command: &Command, callsite: &Callsite) -> Result<Value> {
        let run = self
            .run
            .upgrade()
            .ok_or_else(|| Error::Internal("test run was dropped".to_string()))?;

        match command {
            Command::UseRole { role } => {
                run.activate_role(self.backend.as_ref(), command, role, callsite)
                    .await
            }
            _ => self.backend.execute_command(command, callsite).await,
        }
    }

    fn execute_command_sync(&self, command: &Command, callsite: &Callsite) -> Result<Value> {
        self.backend.execute_command_sync(command, callsite)
    }
}
