//! Test execution driver
//!
//! Walks a [`TestSuite`] fixture by fixture, creating one [`TestRun`] per
//! test and browser and invoking the remote phases in order. The browsers
//! of one test run side by side; tests follow declaration order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::common::{Error, Result};
use crate::run::{
    Callsite, CommandExecutor, LoggingExecutor, SessionRegistry, TestRun, TestRunId,
};
use crate::worker::{FixtureDescriptor, RemotePhase, TestDescriptor, TestSuite};

/// Builds the automation backend for a browser
pub type BackendFactory = Arc<dyn Fn(&str) -> Arc<dyn CommandExecutor> + Send + Sync>;

/// Result of one test in one browser
#[derive(Debug)]
pub struct RunOutcome {
    pub test_id: String,
    pub test_name: String,
    pub fixture_name: String,
    pub browser: String,
    pub errors: Vec<Error>,
    /// Actions that were started but never awaited
    pub missing_awaits: Vec<Callsite>,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Everything a suite run produced
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<RunOutcome>,
    /// Fatal error raised outside any test run, such as a fixture hook
    pub fatal: Option<Error>,
    /// A fatal error stopped the suite early
    pub aborted: bool,
    /// Test/browser pairs that never started
    pub skipped: usize,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        !self.aborted && self.failed() == 0
    }

    /// The error that stopped the suite, wherever it surfaced
    pub fn fatal_error(&self) -> Option<&Error> {
        self.fatal.as_ref().or_else(|| {
            self.outcomes
                .iter()
                .flat_map(|outcome| &outcome.errors)
                .find(|e| e.is_fatal())
        })
    }
}

pub struct Runner {
    registry: SessionRegistry,
    backend: BackendFactory,
}

impl Runner {
    /// Runner whose runs log commands instead of driving a browser
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            backend: Arc::new(|browser: &str| -> Arc<dyn CommandExecutor> {
                Arc::new(LoggingExecutor::new(browser))
            }),
        }
    }

    pub fn with_backend<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn CommandExecutor> + Send + Sync + 'static,
    {
        self.backend = Arc::new(factory);
        self
    }

    /// A fresh run for `browser`, not yet registered
    pub fn create_test_run(&self, browser: &str) -> Arc<TestRun> {
        TestRun::new(TestRunId::generate(), browser, (self.backend)(browser))
    }

    /// Run every test of `suite` in every browser
    pub async fn run(&self, suite: &TestSuite, browsers: &[String]) -> RunReport {
        let mut report = RunReport::default();
        let total = suite.tests.len() * browsers.len();

        for fixture in &suite.fixtures {
            let tests: Vec<_> = suite
                .tests
                .iter()
                .filter(|test| test.fixture_id == fixture.id)
                .collect();
            if tests.is_empty() {
                continue;
            }

            if let Err(e) = self.run_fixture(fixture, &tests, browsers, &mut report).await {
                tracing::error!(fixture = %fixture.name, error = %e, "Aborting test run");
                report.fatal = Some(e);
                report.aborted = true;
            }
            if report.aborted {
                break;
            }
        }

        report.skipped = total - report.outcomes.len();
        report
    }

    /// Fatal hook errors are returned. A fatal error inside a run stays in
    /// that run's outcome and marks the report aborted.
    async fn run_fixture(
        &self,
        fixture: &FixtureDescriptor,
        tests: &[&TestDescriptor],
        browsers: &[String],
        report: &mut RunReport,
    ) -> Result<()> {
        tracing::info!(fixture = %fixture.name, tests = tests.len(), "Starting fixture");

        if let Err(e) = fixture.run_before().await {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!(fixture = %fixture.name, error = %e, "Fixture before hook failed");
            let message = e.to_string();
            for test in tests {
                for browser in browsers {
                    report.outcomes.push(RunOutcome {
                        test_id: test.id.clone(),
                        test_name: test.name.clone(),
                        fixture_name: fixture.name.clone(),
                        browser: browser.clone(),
                        errors: vec![Error::UnhandledHook {
                            hook: "fixture.before".to_string(),
                            message: message.clone(),
                        }],
                        missing_awaits: Vec::new(),
                        duration: Duration::ZERO,
                    });
                }
            }
            return Ok(());
        }

        // Fixture context is shared by every run of the fixture in a browser
        let mut fixture_ctx: HashMap<&str, Arc<Mutex<Map<String, Value>>>> = HashMap::new();

        for test in tests {
            let runs: Vec<Arc<TestRun>> = browsers
                .iter()
                .map(|browser| {
                    let ctx = fixture_ctx.entry(browser.as_str()).or_default().clone();
                    TestRun::with_fixture_ctx(
                        TestRunId::generate(),
                        browser,
                        (self.backend)(browser),
                        ctx,
                    )
                })
                .collect();

            let outcomes = join_all(runs.iter().map(|run| self.run_test(run, fixture, test))).await;
            let lost = outcomes
                .iter()
                .any(|outcome| outcome.errors.iter().any(Error::is_fatal));
            report.outcomes.extend(outcomes);

            if lost {
                tracing::error!(fixture = %fixture.name, test = %test.name, "Aborting test run");
                report.aborted = true;
                return Ok(());
            }
        }

        match fixture.run_after().await {
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!(fixture = %fixture.name, error = %e, "Fixture after hook failed"),
            Ok(()) => {}
        }
        Ok(())
    }

    async fn run_test(
        &self,
        run: &Arc<TestRun>,
        fixture: &FixtureDescriptor,
        test: &TestDescriptor,
    ) -> RunOutcome {
        let _registration = self.registry.register(run);
        let started = Instant::now();
        let id = run.id();
        tracing::info!(test = %test.name, browser = run.browser(), test_run = %id, "Running test");

        for hook in &test.request_hooks {
            run.add_request_hook(hook.clone());
        }

        let mut errors = Vec::new();
        let body: [Option<&RemotePhase>; 3] = [
            fixture.phases.before_each_fn.as_ref(),
            test.phases.before_fn.as_ref(),
            Some(&test.phases.test_fn),
        ];
        let cleanup: [Option<&RemotePhase>; 2] = [
            test.phases.after_fn.as_ref(),
            fixture.phases.after_each_fn.as_ref(),
        ];

        for phase in body.into_iter().flatten() {
            if let Err(e) = phase.call(Some(id)).await {
                errors.push(e);
                break;
            }
        }

        // After hooks run even when the body failed, unless the worker is gone
        if !errors.iter().any(Error::is_fatal) {
            for phase in cleanup.into_iter().flatten() {
                if let Err(e) = phase.call(Some(id)).await {
                    let fatal = e.is_fatal();
                    errors.push(e);
                    if fatal {
                        break;
                    }
                }
            }
        }

        let missing_awaits = run.finish();
        let outcome = RunOutcome {
            test_id: test.id.clone(),
            test_name: test.name.clone(),
            fixture_name: fixture.name.clone(),
            browser: run.browser().to_string(),
            errors,
            missing_awaits,
            duration: started.elapsed(),
        };
        tracing::debug!(test = %test.name, passed = outcome.passed(), "Test finished");
        outcome
    }
}
