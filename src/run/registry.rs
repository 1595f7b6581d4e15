//! Session registry
//!
//! Maps test-run ids to live runs so messages from the worker can be routed.
//! Entries are weak: the registry never keeps a finished run alive. It is
//! used for routing only, never for ordering.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::test_run::{TestRun, TestRunId};

/// Process-wide `testRunId → TestRun` map, shared by reference
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    runs: Arc<RwLock<HashMap<TestRunId, Weak<TestRun>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a run at start; the returned guard removes it when dropped
    pub fn register(&self, run: &Arc<TestRun>) -> Registration {
        tracing::debug!(test_run = %run.id(), browser = run.browser(), "Registering test run");
        self.runs
            .write()
            .insert(run.id().clone(), Arc::downgrade(run));

        Registration {
            registry: self.clone(),
            id: run.id().clone(),
        }
    }

    /// Remove a run at end; unknown ids are ignored
    pub fn unregister(&self, id: &TestRunId) {
        if self.runs.write().remove(id).is_some() {
            tracing::debug!(test_run = %id, "Unregistered test run");
        }
    }

    /// Look up a live run
    pub fn get(&self, id: &TestRunId) -> Option<Arc<TestRun>> {
        self.runs.read().get(id).and_then(Weak::upgrade)
    }

    /// Snapshot of every live run
    pub fn runs(&self) -> Vec<Arc<TestRun>> {
        self.runs
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

/// Keeps a run registered for as long as it is alive
#[derive(Debug)]
pub struct Registration {
    registry: SessionRegistry,
    id: TestRunId,
}

impl Registration {
    pub fn id(&self) -> &TestRunId {
        &self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::executor::LoggingExecutor;

    fn run(id: &str) -> Arc<TestRun> {
        TestRun::new(
            TestRunId::from(id),
            "chrome",
            Arc::new(LoggingExecutor::new("chrome")),
        )
    }

    #[tokio::test]
    async fn test_registration_lifecycle() {
        let registry = SessionRegistry::new();
        let run = run("r1");

        let registration = registry.register(&run);
        assert_eq!(registry.get(run.id()).unwrap().id(), run.id());
        assert_eq!(registry.len(), 1);

        drop(registration);
        assert!(registry.get(run.id()).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.get(&TestRunId::from("missing")).is_none());
        registry.unregister(&TestRunId::from("missing"));
    }

    #[tokio::test]
    async fn test_dropped_run_is_not_returned() {
        let registry = SessionRegistry::new();
        let run = run("r2");
        let _registration = registry.register(&run);
        drop(run);

        assert!(registry.get(&TestRunId::from("r2")).is_none());
        assert!(registry.runs().is_empty());
    }
}
