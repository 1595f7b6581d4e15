//! Missing-await diagnostics
//!
//! Holds the callsites of every enqueued action whose result has not been
//! observed yet. Whatever is still here when the run ends was most likely
//! fired without being awaited.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::callsite::{Callsite, CallsiteId};

/// Set of issued-but-not-yet-observed callsites for one test run
#[derive(Debug, Clone, Default)]
pub struct AwaitTracker {
    pending: Arc<Mutex<BTreeMap<CallsiteId, Callsite>>>,
}

impl AwaitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly enqueued callsite
    pub fn track(&self, callsite: &Callsite) {
        self.pending.lock().insert(callsite.id(), callsite.clone());
    }

    /// Mark a callsite observed; returns whether it was still pending
    ///
    /// Idempotent: repeated calls for the same id are no-ops.
    pub fn mark_observed(&self, id: CallsiteId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    pub fn is_pending(&self, id: CallsiteId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Snapshot of pending callsites in enqueue order
    pub fn pending(&self) -> Vec<Callsite> {
        self.pending.lock().values().cloned().collect()
    }

    /// Take and report every leftover callsite
    ///
    /// Each leftover is logged as a warning; nothing here can fail the run.
    pub fn report(&self, test_run: &str) -> Vec<Callsite> {
        let leftovers: Vec<Callsite> = std::mem::take(&mut *self.pending.lock())
            .into_values()
            .collect();

        for callsite in &leftovers {
            tracing::warn!(
                test_run,
                method = callsite.method(),
                location = %callsite,
                "Action result was never awaited"
            );
        }

        leftovers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_callsite_is_removed_once() {
        let tracker = AwaitTracker::new();
        let callsite = Callsite::capture("click");
        tracker.track(&callsite);
        assert!(tracker.is_pending(callsite.id()));

        assert!(tracker.mark_observed(callsite.id()));
        assert!(!tracker.mark_observed(callsite.id()));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_report_drains_in_enqueue_order() {
        let tracker = AwaitTracker::new();
        let first = Callsite::capture("click");
        let second = Callsite::capture("typeText");
        tracker.track(&first);
        tracker.track(&second);

        let leftovers = tracker.report("run-1");
        let methods: Vec<_> = leftovers.iter().map(|c| c.method().to_string()).collect();
        assert_eq!(methods, vec!["click", "typeText"]);
        assert_eq!(tracker.len(), 0);
    }
}
