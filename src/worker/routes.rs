//! Handlers for messages the worker sends to the orchestrator
//!
//! Each handler does its routing synchronously when invoked, so commands
//! reach a run's chain in the order they arrived. Messages addressed to a
//! run that is not registered are dropped.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::channel::protocol::{
    Actor, DebugParams, ExecuteCommandParams, RequestHooksParams, TestFileAddedParams,
    UseRoleParams,
};
use crate::channel::{ControlChannel, Method};
use crate::common::{Error, Result};
use crate::run::scheduler::Settlement;
use crate::run::{Callsite, Command, Role, SessionRegistry, TestRun, TestRunId};

use super::descriptors::RemotePhase;

/// Event surfaced by the worker outside any request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    TestFileAdded(String),
}

/// Install every worker → orchestrator route on `channel`
pub fn install(
    channel: &ControlChannel,
    registry: &SessionRegistry,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    channel.subscribe(Method::TestFileAdded, move |payload| {
        let result = decode::<TestFileAddedParams>(Method::TestFileAdded, payload).map(|params| {
            tracing::debug!(filename = %params.filename, "Worker added test file");
            let _ = events.send(WorkerEvent::TestFileAdded(params.filename));
            Value::Null
        });
        future::ready(result)
    });

    let routes = registry.clone();
    channel.subscribe(Method::Debug, move |payload| {
        future::ready(decode::<DebugParams>(Method::Debug, payload).map(|params| {
            let runs = match params.id {
                Some(id) => lookup(&routes, &id, Method::Debug).into_iter().collect(),
                None => routes.runs(),
            };
            for run in runs {
                run.begin_debugging();
            }
            Value::Null
        }))
    });

    let routes = registry.clone();
    channel.subscribe(Method::ExecuteCommand, move |payload| {
        let enqueued = decode::<ExecuteCommandParams>(Method::ExecuteCommand, payload)
            .and_then(|params| {
                let Some(run) = lookup(&routes, &params.id, Method::ExecuteCommand) else {
                    return Ok(None);
                };
                let callsite = Callsite::remote(params.command.kind(), params.callsite);
                run.execute_command(callsite, params.command).map(Some)
            });
        settle(enqueued)
    });

    let routes = registry.clone();
    let weak_channel = channel.downgrade();
    channel.subscribe(Method::UseRole, move |payload| {
        let enqueued = decode::<UseRoleParams>(Method::UseRole, payload).and_then(|params| {
            let Some(run) = lookup(&routes, &params.id, Method::UseRole) else {
                return Ok(None);
            };

            let wire = params.role;
            let mut role = Role::new(wire.id.clone(), wire.login_page, wire.options);
            if wire.init_fn {
                let channel = weak_channel
                    .upgrade()
                    .ok_or_else(|| Error::worker_terminated("control channel dropped"))?;
                // Scoped to the role's own id, not the test that triggered it
                let init = RemotePhase::new(channel, wire.id, Actor::Roles, "initFn");
                role = role.with_initializer(Arc::new(init));
            }

            run.execute_command(Callsite::remote("useRole", None), Command::UseRole { role })
                .map(Some)
        });
        settle(enqueued)
    });

    let routes = registry.clone();
    channel.subscribe(Method::AddRequestHooks, move |payload| {
        future::ready(
            decode::<RequestHooksParams>(Method::AddRequestHooks, payload).map(|params| {
                if let Some(run) = lookup(&routes, &params.id, Method::AddRequestHooks) {
                    for hook in params.hooks {
                        run.add_request_hook(hook);
                    }
                }
                Value::Null
            }),
        )
    });

    let routes = registry.clone();
    channel.subscribe(Method::RemoveRequestHooks, move |payload| {
        future::ready(
            decode::<RequestHooksParams>(Method::RemoveRequestHooks, payload).map(|params| {
                if let Some(run) = lookup(&routes, &params.id, Method::RemoveRequestHooks) {
                    for hook in params.hooks {
                        run.remove_request_hook(&hook.id);
                    }
                }
                Value::Null
            }),
        )
    });
}

fn decode<T: DeserializeOwned>(method: Method, payload: Value) -> Result<T> {
    // A frame without payload decodes like an empty object
    let payload = match payload {
        Value::Null => Value::Object(Default::default()),
        payload => payload,
    };
    serde_json::from_value(payload)
        .map_err(|e| Error::Protocol(format!("Invalid '{}' payload: {}", method, e)))
}

fn lookup(registry: &SessionRegistry, id: &TestRunId, method: Method) -> Option<Arc<TestRun>> {
    let run = registry.get(id);
    if run.is_none() {
        tracing::trace!(test_run = %id, method = %method, "Dropping message for unknown test run");
    }
    run
}

/// Await a command queued during routing; unknown runs answer `null`
fn settle(enqueued: Result<Option<Settlement>>) -> BoxFuture<'static, Result<Value>> {
    match enqueued {
        Ok(Some(settlement)) => settlement.boxed(),
        Ok(None) => future::ready(Ok(Value::Null)).boxed(),
        Err(e) => future::ready(Err(e)).boxed(),
    }
}
