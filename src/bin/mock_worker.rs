//! Mock worker binary for integration testing
//!
//! Speaks the control protocol over stdin/stdout and the side channel named
//! by `CONDUCTOR_SIDE_CHANNEL`. "Compiles" YAML test files: each step is
//! forwarded to the orchestrator as an `execute-command` request while the
//! test runs.
//!
//! ```yaml
//! fixture: Login
//! before: true
//! before_each:
//!   - { type: navigate-to, url: "http://example.com/login" }
//! tests:
//!   - name: submits the form
//!     hooks: [logger]
//!     steps:
//!       - { type: type-text, selector: "#user", text: "admin" }
//!       - { type: click, selector: "#submit" }
//!   - name: broken
//!     steps:
//!       - { type: fail, message: "expected 1 to equal 2" }
//! ```
//!
//! Besides browser commands, steps may be `fail`, `crash`, `debug`,
//! `use-role`, `add-request-hooks` and `remove-request-hooks`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Notify;

use conductor::channel::codec::DEFAULT_MAX_MESSAGE;
use conductor::channel::protocol::{
    Actor, GetTestsParams, RunTestParams, TestFileAddedParams, WireFixture, WireTest,
};
use conductor::channel::transmitter::WeakControlChannel;
use conductor::channel::{transport, ControlChannel, Duplex, Method, Transport};
use conductor::common::{logging, paths, Error, Result};
use conductor::run::{RequestHookProxy, TestRunId};

#[derive(Debug, Deserialize)]
struct TestFile {
    fixture: String,
    #[serde(default)]
    before: bool,
    #[serde(default)]
    after: bool,
    #[serde(default)]
    before_each: Vec<Value>,
    #[serde(default)]
    after_each: Vec<Value>,
    #[serde(default)]
    tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Deserialize)]
struct TestCase {
    name: String,
    #[serde(default)]
    before: Vec<Value>,
    #[serde(default)]
    after: Vec<Value>,
    #[serde(default)]
    steps: Vec<Value>,
    #[serde(default)]
    hooks: Vec<String>,
}

struct Fixture {
    path: String,
    before_each: Vec<Value>,
    after_each: Vec<Value>,
}

struct Test {
    path: String,
    case: TestCase,
}

struct Worker {
    channel: WeakControlChannel,
    fixtures: Mutex<HashMap<String, Arc<Fixture>>>,
    tests: Mutex<HashMap<String, Arc<Test>>>,
}

#[tokio::main]
async fn main() {
    logging::init_worker();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Worker failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let name = std::env::var(paths::SIDE_CHANNEL_ENV)
        .map_err(|_| Error::Config(format!("{} is not set", paths::SIDE_CHANNEL_ENV)))?;
    let side = transport::connect_side_channel(&name).await?;
    tracing::debug!(side_channel = %name, "Connected to orchestrator");

    let transport = Transport::stdio().with_side_channel(Duplex::from_stream(side));
    let channel = ControlChannel::new(transport, DEFAULT_MAX_MESSAGE);
    let worker = Arc::new(Worker {
        channel: channel.downgrade(),
        fixtures: Mutex::new(HashMap::new()),
        tests: Mutex::new(HashMap::new()),
    });
    let exit = Arc::new(Notify::new());

    channel.subscribe(Method::GetTests, {
        let worker = worker.clone();
        move |payload| {
            let worker = worker.clone();
            async move { worker.get_tests(payload).await }
        }
    });

    channel.subscribe(Method::RunTest, {
        let worker = worker.clone();
        move |payload| {
            let worker = worker.clone();
            async move { worker.run_test(payload).await }
        }
    });

    channel.subscribe(Method::CleanUp, {
        let worker = worker.clone();
        move |_payload| {
            worker.fixtures.lock().clear();
            worker.tests.lock().clear();
            async { Ok(Value::Null) }
        }
    });

    channel.subscribe(Method::Exit, {
        let exit = exit.clone();
        move |_payload| {
            exit.notify_one();
            async { Ok(Value::Null) }
        }
    });

    channel.listen();

    tokio::select! {
        _ = exit.notified() => {
            // Let the exit reply flush before the process goes away
            tokio::time::sleep(Duration::from_millis(20)).await;
            tracing::debug!("Exit requested");
        }
        _ = channel.closed() => tracing::debug!("Orchestrator closed the channel"),
    }
    Ok(())
}

impl Worker {
    fn channel(&self) -> Result<ControlChannel> {
        self.channel
            .upgrade()
            .ok_or_else(|| Error::worker_terminated("control channel dropped"))
    }

    async fn get_tests(&self, payload: Value) -> Result<Value> {
        let params: GetTestsParams = serde_json::from_value(payload)?;
        let mut wire = Vec::new();

        for source in params.sources {
            let content = tokio::fs::read_to_string(&source)
                .await
                .map_err(|e| Error::Compilation(format!("{}: {}", source, e)))?;
            let file: TestFile = serde_yaml::from_str(&content)
                .map_err(|e| Error::Compilation(format!("{}: {}", source, e)))?;

            let fixture = WireFixture {
                id: source.clone(),
                name: file.fixture.clone(),
                path: source.clone(),
                before_fn: file.before,
                after_fn: file.after,
                before_each_fn: !file.before_each.is_empty(),
                after_each_fn: !file.after_each.is_empty(),
            };
            self.fixtures.lock().insert(
                source.clone(),
                Arc::new(Fixture {
                    path: source.clone(),
                    before_each: file.before_each,
                    after_each: file.after_each,
                }),
            );

            for (idx, case) in file.tests.into_iter().enumerate() {
                let id = format!("{}#{}", source, idx);
                wire.push(WireTest {
                    id: id.clone(),
                    name: case.name.clone(),
                    fixture: fixture.clone(),
                    before_fn: !case.before.is_empty(),
                    after_fn: !case.after.is_empty(),
                    request_hooks: case.hooks.iter().map(RequestHookProxy::new).collect(),
                });
                self.tests.lock().insert(
                    id,
                    Arc::new(Test {
                        path: source.clone(),
                        case,
                    }),
                );
            }

            let added = TestFileAddedParams { filename: source };
            self.channel()?
                .notify(Method::TestFileAdded, serde_json::to_value(&added)?)
                .await?;
        }

        tracing::info!(tests = wire.len(), "Compiled test files");
        Ok(serde_json::to_value(wire)?)
    }

    async fn run_test(&self, payload: Value) -> Result<Value> {
        let params: RunTestParams = serde_json::from_value(payload)?;
        tracing::debug!(idx = %params.idx, actor = params.actor.as_str(), func = %params.func, "Running phase");

        let (path, steps) = match params.actor {
            Actor::Tests => {
                let test = self.tests.lock().get(&params.idx).cloned();
                let test = test.ok_or_else(|| unknown(&params))?;
                let steps = match params.func.as_str() {
                    "fn" => test.case.steps.clone(),
                    "beforeFn" => test.case.before.clone(),
                    "afterFn" => test.case.after.clone(),
                    _ => return Err(unknown(&params)),
                };
                (test.path.clone(), steps)
            }
            Actor::Fixtures => {
                let fixture = self.fixtures.lock().get(&params.idx).cloned();
                let fixture = fixture.ok_or_else(|| unknown(&params))?;
                let steps = match params.func.as_str() {
                    "beforeFn" | "afterFn" => Vec::new(),
                    "beforeEachFn" => fixture.before_each.clone(),
                    "afterEachFn" => fixture.after_each.clone(),
                    _ => return Err(unknown(&params)),
                };
                (fixture.path.clone(), steps)
            }
            // Role initializers run inside the orchestrator's command chain,
            // so they must not queue commands of their own
            Actor::Roles => return Ok(Value::Null),
        };

        if steps.is_empty() {
            return Ok(Value::Null);
        }
        let run_id = params.test_run_id.ok_or_else(|| {
            Error::Protocol(format!("'{}' of {} needs a test run", params.func, params.idx))
        })?;

        let channel = self.channel()?;
        for (index, step) in steps.iter().enumerate() {
            execute_step(&channel, &run_id, &path, index, step).await?;
        }
        Ok(Value::Null)
    }
}

fn unknown(params: &RunTestParams) -> Error {
    Error::Protocol(format!(
        "No {} '{}' with '{}'",
        params.actor.as_str(),
        params.idx,
        params.func
    ))
}

async fn execute_step(
    channel: &ControlChannel,
    run_id: &TestRunId,
    path: &str,
    index: usize,
    step: &Value,
) -> Result<Value> {
    let kind = step.get("type").and_then(Value::as_str).unwrap_or_default();

    match kind {
        "fail" => Err(Error::RemoteFailure {
            method: Method::RunTest.to_string(),
            code: "TEST_FAILED".to_string(),
            message: step["message"].as_str().unwrap_or("failed").to_string(),
        }),
        "crash" => {
            let code = step["code"].as_i64().unwrap_or(3) as i32;
            tracing::warn!(code, "Crashing on request");
            std::process::exit(code);
        }
        "debug" => channel.send(Method::Debug, json!({ "id": run_id })).await,
        "use-role" => {
            let role = &step["role"];
            let wire = json!({
                "id": role["id"],
                "loginPage": role["page"],
                "initFn": role["init"].as_bool().unwrap_or(false),
            });
            channel
                .send(Method::UseRole, json!({ "id": run_id, "role": wire }))
                .await
        }
        "add-request-hooks" | "remove-request-hooks" => {
            let method = if kind == "add-request-hooks" {
                Method::AddRequestHooks
            } else {
                Method::RemoveRequestHooks
            };
            let hooks: Vec<Value> = step["hooks"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|id| json!({ "id": id }))
                .collect();
            channel.send(method, json!({ "id": run_id, "hooks": hooks })).await
        }
        _ => {
            let callsite = json!({
                "filename": path,
                "line": index + 1,
                "column": 1,
            });
            channel
                .send(
                    Method::ExecuteCommand,
                    json!({ "id": run_id, "command": step, "callsite": callsite }),
                )
                .await
        }
    }
}
