//! Debugger event → test run fan-out

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::run::SessionRegistry;

use super::{DebuggerEvent, StepDebugger};

/// Forwards pause/resume from a step debugger to every registered run
pub struct DebugBridge {
    debugger: Arc<dyn StepDebugger>,
    task: JoinHandle<()>,
}

impl DebugBridge {
    /// Take the debugger's event stream and start forwarding
    pub fn spawn(
        debugger: Arc<dyn StepDebugger>,
        registry: SessionRegistry,
        internal_paths: Vec<String>,
    ) -> Result<Self> {
        let events = debugger
            .take_event_receiver()
            .ok_or_else(|| Error::Debugger("event stream already taken".to_string()))?;

        let task = tokio::spawn(forward_events(
            events,
            debugger.clone(),
            registry,
            internal_paths,
        ));

        Ok(Self { debugger, task })
    }

    /// Stop forwarding and detach from the debugger
    pub async fn shutdown(self) {
        self.task.abort();
        if let Err(e) = self.debugger.detach().await {
            tracing::warn!(error = %e, "Failed to detach debugger");
        }
    }
}

async fn forward_events(
    mut events: mpsc::UnboundedReceiver<DebuggerEvent>,
    debugger: Arc<dyn StepDebugger>,
    registry: SessionRegistry,
    internal_paths: Vec<String>,
) {
    while let Some(event) = events.recv().await {
        match event {
            DebuggerEvent::Paused { top_frame_path } => {
                let paused = registry
                    .runs()
                    .iter()
                    .filter(|run| run.begin_debugging())
                    .count();
                tracing::debug!(paused, frame = ?top_frame_path, "Debugger paused");

                if is_internal(top_frame_path.as_deref(), &internal_paths) {
                    tracing::debug!("Stepping out of orchestrator frame");
                    if let Err(e) = debugger.step_out().await {
                        tracing::warn!(error = %e, "Failed to step out");
                    }
                }
            }
            DebuggerEvent::Resumed => {
                for run in registry.runs() {
                    run.end_debugging();
                }
                tracing::debug!("Debugger resumed");
            }
        }
    }

    tracing::debug!("Debugger event stream ended");
}

fn is_internal(path: Option<&str>, prefixes: &[String]) -> bool {
    path.is_some_and(|path| prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{LoggingExecutor, TestRun, TestRunId};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeDebugger {
        events: Mutex<Option<mpsc::UnboundedReceiver<DebuggerEvent>>>,
        step_outs: AtomicUsize,
        detaches: AtomicUsize,
    }

    impl FakeDebugger {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<DebuggerEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let debugger = Arc::new(Self {
                events: Mutex::new(Some(rx)),
                step_outs: AtomicUsize::new(0),
                detaches: AtomicUsize::new(0),
            });
            (debugger, tx)
        }
    }

    #[async_trait]
    impl StepDebugger for FakeDebugger {
        async fn pause(&self) -> Result<()> {
            Ok(())
        }

        async fn resume(&self) -> Result<()> {
            Ok(())
        }

        async fn step_out(&self) -> Result<()> {
            self.step_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn detach(&self) -> Result<()> {
            self.detaches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<DebuggerEvent>> {
            self.events.lock().take()
        }
    }

    fn run(id: &str) -> Arc<TestRun> {
        TestRun::new(
            TestRunId::from(id),
            "chrome",
            Arc::new(LoggingExecutor::new("chrome")),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_pause_and_resume_fan_out() {
        let registry = SessionRegistry::new();
        let (a, b) = (run("a"), run("b"));
        let _ra = registry.register(&a);
        let _rb = registry.register(&b);

        let (debugger, events) = FakeDebugger::new();
        let bridge = DebugBridge::spawn(debugger.clone(), registry.clone(), vec![]).unwrap();

        events
            .send(DebuggerEvent::Paused {
                top_frame_path: Some("/project/tests/login.yml".into()),
            })
            .unwrap();
        settle().await;
        assert!(a.is_debugging() && b.is_debugging());
        assert_eq!(debugger.step_outs.load(Ordering::SeqCst), 0);

        events.send(DebuggerEvent::Resumed).unwrap();
        settle().await;
        assert!(!a.is_debugging() && !b.is_debugging());

        bridge.shutdown().await;
        assert_eq!(debugger.detaches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_internal_frame_is_stepped_out() {
        let registry = SessionRegistry::new();
        let (debugger, events) = FakeDebugger::new();
        let _bridge = DebugBridge::spawn(
            debugger.clone(),
            registry,
            vec!["/opt/conductor/".to_string()],
        )
        .unwrap();

        events
            .send(DebuggerEvent::Paused {
                top_frame_path: Some("/opt/conductor/api/controller.js".into()),
            })
            .unwrap();
        events
            .send(DebuggerEvent::Paused { top_frame_path: None })
            .unwrap();
        settle().await;

        assert_eq!(debugger.step_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_event_stream_can_only_be_taken_once() {
        let (debugger, _events) = FakeDebugger::new();
        let _bridge = DebugBridge::spawn(debugger.clone(), SessionRegistry::new(), vec![]).unwrap();

        assert!(matches!(
            DebugBridge::spawn(debugger, SessionRegistry::new(), vec![]),
            Err(Error::Debugger(_))
        ));
    }
}
