//! End-to-end integration tests for the orchestrator
//!
//! These tests spawn the `mock_worker` binary, which compiles YAML test
//! files and forwards their steps back over the control channel, then verify
//! the complete flow: handshake, test discovery, phase execution, command
//! routing and worker shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use conductor::common::config::Config;
use conductor::run::{CommandExecutor, SessionRegistry};
use conductor::runner::Runner;
use conductor::worker::{WorkerEvent, WorkerProcessManager};
use conductor::{Callsite, Command, Error, Result};

/// Backend that records the kind of every command it performs
#[derive(Default)]
struct Recorder {
    kinds: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandExecutor for Recorder {
    async fn execute_command(&self, command: &Command, _callsite: &Callsite) -> Result<Value> {
        self.kinds.lock().push(command.kind().to_string());
        Ok(json!({ "done": command.kind() }))
    }

    fn execute_command_sync(&self, command: &Command, _callsite: &Callsite) -> Result<Value> {
        Ok(json!({ "read": command.kind() }))
    }
}

/// Temporary directory holding YAML test files
struct TestContext {
    dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write test file");
        path.to_string_lossy().into_owned()
    }
}

async fn start_worker(registry: SessionRegistry) -> WorkerProcessManager {
    let mut manager = WorkerProcessManager::new(Config::default(), registry)
        .with_executable(env!("CARGO_BIN_EXE_mock_worker"));
    manager.init().await.expect("Worker failed to start");
    manager
}

const LOGIN: &str = r##"
fixture: Login
before: true
after: true
before_each:
  - { type: navigate-to, url: "http://example.com/login" }
tests:
  - name: submits the form
    hooks: [logger]
    steps:
      - { type: type-text, selector: "#user", text: "admin" }
      - { type: click, selector: "#submit" }
  - name: shows an error
    steps:
      - { type: fail, message: "expected 1 to equal 2" }
"##;

const PROFILE: &str = r##"
fixture: Profile
tests:
  - name: opens settings
    steps:
      - type: use-role
        role: { id: admin, page: "http://example.com/login", init: true }
      - { type: hover, selector: ".avatar" }
"##;

#[tokio::test]
async fn test_list_reports_fixtures_and_tests() {
    let ctx = TestContext::new();
    let login = ctx.write("login.yml", LOGIN);
    let profile = ctx.write("profile.yml", PROFILE);

    let mut manager = start_worker(SessionRegistry::new()).await;
    let mut events = manager.take_event_receiver().unwrap();

    let suite = manager
        .get_tests(&[login.clone(), profile.clone()])
        .await
        .unwrap();

    assert_eq!(suite.fixtures.len(), 2);
    assert_eq!(suite.fixtures[0].name, "Login");
    assert_eq!(suite.fixtures[1].name, "Profile");
    assert_eq!(suite.tests.len(), 3);
    assert_eq!(suite.tests[0].name, "submits the form");
    assert_eq!(suite.tests[0].request_hooks[0].id, "logger");
    assert!(suite.fixtures[0].phases.before_each_fn.is_some());
    assert!(suite.fixtures[1].phases.before_fn.is_none());

    for expected in [login, profile] {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, WorkerEvent::TestFileAdded(expected));
    }

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_run_forwards_steps_to_backend() {
    let ctx = TestContext::new();
    let login = ctx.write("login.yml", LOGIN);
    let profile = ctx.write("profile.yml", PROFILE);

    let registry = SessionRegistry::new();
    let mut manager = start_worker(registry.clone()).await;
    let suite = manager.get_tests(&[login, profile]).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let backend = recorder.clone();
    let report = Runner::new(registry.clone())
        .with_backend(move |_browser| backend.clone())
        .run(&suite, &["chrome".to_string()])
        .await;

    assert!(report.fatal.is_none());
    assert_eq!(report.outcomes.len(), 3);
    assert!(report.outcomes[0].passed());
    assert!(report.outcomes[2].passed());

    match &report.outcomes[1].errors[..] {
        [Error::RemoteFailure { code, message, .. }] => {
            assert_eq!(code, "TEST_FAILED");
            assert!(message.contains("expected 1 to equal 2"));
        }
        other => panic!("unexpected errors: {other:?}"),
    }

    assert_eq!(
        *recorder.kinds.lock(),
        vec![
            "navigate-to",
            "type-text",
            "click",
            "navigate-to",
            "use-role",
            "hover",
        ]
    );
    assert!(registry.is_empty());

    manager.clean_up().await.unwrap();
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_command_fails_only_that_test() {
    let ctx = TestContext::new();
    let file = ctx.write(
        "invalid.yml",
        r##"
fixture: Validation
tests:
  - name: empty url
    steps:
      - { type: navigate-to, url: "" }
      - { type: click, selector: "#never" }
  - name: still runs
    steps:
      - { type: click, selector: "#ok" }
"##,
    );

    let registry = SessionRegistry::new();
    let mut manager = start_worker(registry.clone()).await;
    let suite = manager.get_tests(&[file]).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let backend = recorder.clone();
    let report = Runner::new(registry)
        .with_backend(move |_browser| backend.clone())
        .run(&suite, &["chrome".to_string()])
        .await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.passed(), 1);
    match &report.outcomes[0].errors[..] {
        [Error::RemoteFailure { code, .. }] => assert_eq!(code, "VALIDATION_ERROR"),
        other => panic!("unexpected errors: {other:?}"),
    }
    // The rejected command never reached the backend
    assert_eq!(*recorder.kinds.lock(), vec!["click"]);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_crash_aborts_remaining_tests() {
    let ctx = TestContext::new();
    let file = ctx.write(
        "crash.yml",
        r##"
fixture: Crash
tests:
  - name: takes the worker down
    steps:
      - { type: crash, code: 7 }
  - name: never runs
    steps:
      - { type: click, selector: "#a" }
"##,
    );

    let registry = SessionRegistry::new();
    let mut manager = start_worker(registry.clone()).await;
    let suite = manager.get_tests(&[file]).await.unwrap();

    let report = Runner::new(registry.clone())
        .run(&suite, &["chrome".to_string(), "firefox".to_string()])
        .await;

    // Both browsers of the first test were in flight; each reports the
    // crash once and the second test never starts
    assert!(report.aborted);
    assert!(report.fatal.is_none());
    assert_eq!(report.outcomes.len(), 2);
    for (outcome, browser) in report.outcomes.iter().zip(["chrome", "firefox"]) {
        assert_eq!(outcome.browser, browser);
        assert_eq!(outcome.test_name, "takes the worker down");
        assert!(matches!(
            outcome.errors[..],
            [Error::WorkerTerminated { .. }]
        ));
    }
    assert!(matches!(
        report.fatal_error(),
        Some(Error::WorkerTerminated { .. })
    ));
    assert_eq!(report.skipped, 2);
    assert!(registry.is_empty());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_compile_error_is_fatal() {
    let ctx = TestContext::new();
    let file = ctx.write("broken.yml", "fixture: [unterminated\n");

    let mut manager = start_worker(SessionRegistry::new()).await;
    let err = manager.get_tests(&[file]).await.unwrap_err();

    assert!(matches!(err, Error::Compilation(_)), "got {err:?}");
    assert!(err.is_fatal());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_releases_worker() {
    let mut manager = start_worker(SessionRegistry::new()).await;
    assert!(manager.channel().is_ok());

    manager.stop().await.unwrap();
    assert!(manager.channel().is_err());
    // A second stop has nothing left to do
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_executable_fails_to_spawn() {
    let mut manager = WorkerProcessManager::new(Config::default(), SessionRegistry::new())
        .with_executable("/nonexistent/conductor-worker");

    let err = manager.init().await.unwrap_err();
    assert!(matches!(err, Error::WorkerSpawnFailed(_)), "got {err:?}");
}
