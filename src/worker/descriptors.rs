//! Test and fixture descriptors discovered by the worker
//!
//! Phase bodies live in the worker; each phase here is a [`RemotePhase`]
//! that calls back over the control channel when invoked.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::channel::protocol::{Actor, RunTestParams, WireFixture, WireTest};
use crate::channel::{ControlChannel, Method};
use crate::common::Result;
use crate::run::{RequestHookProxy, RoleInitializer, TestRunId};

/// A function body that runs inside the worker
#[derive(Debug, Clone)]
pub struct RemotePhase {
    channel: ControlChannel,
    entity_id: String,
    actor: Actor,
    func: &'static str,
}

impl RemotePhase {
    pub fn new(
        channel: ControlChannel,
        entity_id: impl Into<String>,
        actor: Actor,
        func: &'static str,
    ) -> Self {
        Self {
            channel,
            entity_id: entity_id.into(),
            actor,
            func,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn actor(&self) -> Actor {
        self.actor
    }

    pub fn func(&self) -> &'static str {
        self.func
    }

    /// Run the phase in the worker, on behalf of `test_run_id` if given
    pub async fn call(&self, test_run_id: Option<&TestRunId>) -> Result<Value> {
        tracing::debug!(
            entity = %self.entity_id,
            actor = self.actor.as_str(),
            func = self.func,
            test_run = ?test_run_id.map(TestRunId::as_str),
            "Running remote phase"
        );

        let params = RunTestParams {
            idx: self.entity_id.clone(),
            actor: self.actor,
            func: self.func.to_string(),
            test_run_id: test_run_id.cloned(),
        };
        self.channel.request(Method::RunTest, &params).await
    }
}

#[async_trait]
impl RoleInitializer for RemotePhase {
    async fn initialize(&self, test_run_id: &TestRunId) -> Result<Value> {
        self.call(Some(test_run_id)).await
    }
}

#[derive(Debug, Clone)]
pub struct TestPhases {
    pub test_fn: RemotePhase,
    pub before_fn: Option<RemotePhase>,
    pub after_fn: Option<RemotePhase>,
}

#[derive(Debug, Clone, Default)]
pub struct FixturePhases {
    pub before_fn: Option<RemotePhase>,
    pub after_fn: Option<RemotePhase>,
    pub before_each_fn: Option<RemotePhase>,
    pub after_each_fn: Option<RemotePhase>,
}

#[derive(Debug, Clone)]
pub struct FixtureDescriptor {
    pub id: String,
    pub name: String,
    pub path: String,
    pub phases: FixturePhases,
}

impl FixtureDescriptor {
    /// Fixture-level `before`; runs once, outside any test run
    pub async fn run_before(&self) -> Result<()> {
        if let Some(phase) = &self.phases.before_fn {
            phase.call(None).await?;
        }
        Ok(())
    }

    /// Fixture-level `after`; runs once, outside any test run
    pub async fn run_after(&self) -> Result<()> {
        if let Some(phase) = &self.phases.after_fn {
            phase.call(None).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TestDescriptor {
    pub id: String,
    pub name: String,
    pub fixture_id: String,
    pub phases: TestPhases,
    pub request_hooks: Vec<RequestHookProxy>,
}

/// Everything `get-tests` reported, fixtures deduplicated
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    pub fixtures: Vec<FixtureDescriptor>,
    pub tests: Vec<TestDescriptor>,
}

impl TestSuite {
    pub fn from_wire(channel: &ControlChannel, tests: Vec<WireTest>) -> Self {
        let mut seen = HashSet::new();
        let mut suite = TestSuite::default();

        for test in tests {
            if seen.insert(test.fixture.id.clone()) {
                suite.fixtures.push(fixture_descriptor(channel, &test.fixture));
            }

            let phase = |flag: bool, func: &'static str| {
                flag.then(|| RemotePhase::new(channel.clone(), test.id.clone(), Actor::Tests, func))
            };

            suite.tests.push(TestDescriptor {
                phases: TestPhases {
                    test_fn: RemotePhase::new(channel.clone(), test.id.clone(), Actor::Tests, "fn"),
                    before_fn: phase(test.before_fn, "beforeFn"),
                    after_fn: phase(test.after_fn, "afterFn"),
                },
                fixture_id: test.fixture.id.clone(),
                id: test.id,
                name: test.name,
                request_hooks: test.request_hooks,
            });
        }

        suite
    }

    pub fn fixture(&self, id: &str) -> Option<&FixtureDescriptor> {
        self.fixtures.iter().find(|fixture| fixture.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

fn fixture_descriptor(channel: &ControlChannel, fixture: &WireFixture) -> FixtureDescriptor {
    let phase = |flag: bool, func: &'static str| {
        flag.then(|| RemotePhase::new(channel.clone(), fixture.id.clone(), Actor::Fixtures, func))
    };

    FixtureDescriptor {
        id: fixture.id.clone(),
        name: fixture.name.clone(),
        path: fixture.path.clone(),
        phases: FixturePhases {
            before_fn: phase(fixture.before_fn, "beforeFn"),
            after_fn: phase(fixture.after_fn, "afterFn"),
            before_each_fn: phase(fixture.before_each_fn, "beforeEachFn"),
            after_each_fn: phase(fixture.after_each_fn, "afterEachFn"),
        },
    }
}
