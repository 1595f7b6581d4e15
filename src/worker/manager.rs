//! Worker process lifecycle
//!
//! Spawns the worker, performs the side-channel handshake, installs the
//! message routes and exposes typed wrappers for the worker's requests.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::channel::protocol::{Actor, GetTestsParams, WireTest};
use crate::channel::transport::{self, Duplex, Listener, Transport};
use crate::channel::{ControlChannel, Method};
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::dap::DapDebugger;
use crate::debug::{DebugBridge, StepDebugger};
use crate::run::{SessionRegistry, TestRunId};

use super::debug_info::DebugInfo;
use super::descriptors::{RemotePhase, TestSuite};
use super::routes::{self, WorkerEvent};

/// Owns one worker process and its control channel
pub struct WorkerProcessManager {
    config: Config,
    executable: Option<PathBuf>,
    registry: SessionRegistry,
    channel: Option<ControlChannel>,
    child: Option<Child>,
    side_channel: Option<String>,
    debug_info: Option<DebugInfo>,
    bridge: Option<DebugBridge>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
}

impl WorkerProcessManager {
    pub fn new(config: Config, registry: SessionRegistry) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            executable: None,
            registry,
            channel: None,
            child: None,
            side_channel: None,
            debug_info: None,
            bridge: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Use this worker executable instead of the configured one
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn debug_info(&self) -> Option<&DebugInfo> {
        self.debug_info.as_ref()
    }

    /// Spawn the worker and wait for it to connect back
    pub async fn init(&mut self) -> Result<()> {
        let executable = match &self.executable {
            Some(path) => path.clone(),
            None => self.config.worker_executable()?,
        };
        let debug_info = DebugInfo::resolve(&self.config.worker.flags, &self.config.debugger)?;

        let name = paths::next_side_channel_name();
        let listener = transport::bind_side_channel(&name).map_err(|e| {
            Error::WorkerSpawnFailed(format!("Failed to bind side channel {}: {}", name, e))
        })?;
        self.side_channel = Some(name.clone());

        let mut cmd = Command::new(&executable);
        cmd.args(&self.config.worker.args)
            .args(&self.config.worker.flags)
            .env(paths::SIDE_CHANNEL_ENV, &name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(info) = debug_info.as_ref().filter(|info| info.is_default) {
            cmd.arg(info.inspect_flag());
        }

        tracing::info!(worker = %executable.display(), side_channel = %name, "Spawning worker");
        let mut child = cmd.spawn().map_err(|e| {
            Error::WorkerSpawnFailed(format!("{}: {}", executable.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::WorkerSpawnFailed("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::WorkerSpawnFailed("Failed to get worker stdout".to_string()))?;

        let side = self.handshake(&listener, &mut child).await?;
        self.child = Some(child);

        let transport = Transport::new(Duplex::new(stdout, stdin)).with_side_channel(side);
        self.start(transport);

        if let Some(info) = debug_info {
            self.attach_dap(&info).await?;
            self.debug_info = Some(info);
        }
        Ok(())
    }

    /// Use an already-connected transport instead of spawning a worker
    pub fn connect(&mut self, transport: Transport) {
        self.start(transport);
    }

    /// Forward pause/resume from `debugger` to every registered run
    pub async fn attach_debugger(&mut self, debugger: Arc<dyn StepDebugger>) -> Result<()> {
        if let Some(previous) = self.bridge.take() {
            previous.shutdown().await;
        }
        self.bridge = Some(DebugBridge::spawn(
            debugger,
            self.registry.clone(),
            self.config.debugger.internal_paths.clone(),
        )?);
        Ok(())
    }

    /// Take the worker event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<WorkerEvent>> {
        self.events_rx.take()
    }

    pub fn channel(&self) -> Result<&ControlChannel> {
        self.channel
            .as_ref()
            .ok_or_else(|| Error::Internal("worker not started".to_string()))
    }

    /// Compile `sources` in the worker and describe what it found
    pub async fn get_tests(&self, sources: &[String]) -> Result<TestSuite> {
        let channel = self.channel()?;
        let params = GetTestsParams {
            sources: sources.to_vec(),
        };
        let tests: Vec<WireTest> = channel.request(Method::GetTests, &params).await?;

        let suite = TestSuite::from_wire(channel, tests);
        tracing::info!(
            tests = suite.tests.len(),
            fixtures = suite.fixtures.len(),
            "Worker reported tests"
        );
        Ok(suite)
    }

    /// Run one phase of a test, fixture or role in the worker
    pub async fn run_test(
        &self,
        entity_id: &str,
        actor: Actor,
        test_run_id: Option<&TestRunId>,
        func: &'static str,
    ) -> Result<Value> {
        RemotePhase::new(self.channel()?.clone(), entity_id, actor, func)
            .call(test_run_id)
            .await
    }

    pub async fn clean_up(&self) -> Result<()> {
        self.channel()?.send(Method::CleanUp, Value::Null).await?;
        Ok(())
    }

    /// Ask the worker to exit, then kill it if it outlives the grace period
    pub async fn stop(&mut self) -> Result<()> {
        let grace = Duration::from_millis(self.config.timeouts.stop_grace_ms);

        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown().await;
        }

        if let Some(channel) = self.channel.take() {
            match tokio::time::timeout(grace, channel.send(Method::Exit, Value::Null)).await {
                Ok(Ok(_)) => tracing::debug!("Worker acknowledged exit"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Exit request failed"),
                Err(_) => tracing::warn!("Worker did not acknowledge exit"),
            }
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "Worker exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for worker"),
                Err(_) => {
                    tracing::warn!("Worker still running after grace period, killing");
                    child.kill().await?;
                }
            }
        }

        self.remove_side_channel();
        Ok(())
    }

    fn start(&mut self, transport: Transport) {
        let channel = ControlChannel::new(transport, self.config.channel.max_message_bytes());
        routes::install(&channel, &self.registry, self.events_tx.clone());
        channel.listen();
        self.channel = Some(channel);
    }

    /// The worker proves it is alive by connecting to the side channel
    async fn handshake(&self, listener: &Listener, child: &mut Child) -> Result<Duplex> {
        let secs = self.config.timeouts.handshake_secs;

        tokio::select! {
            accepted = transport::accept_side_channel(listener) => {
                let stream = accepted.map_err(|e| {
                    Error::WorkerSpawnFailed(format!("Side channel accept failed: {}", e))
                })?;
                tracing::debug!("Worker connected to side channel");
                Ok(Duplex::from_stream(stream))
            }
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                Err(Error::WorkerExitedEarly(code))
            }
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                Err(Error::HandshakeTimeout(secs))
            }
        }
    }

    async fn attach_dap(&mut self, info: &DebugInfo) -> Result<()> {
        let timeout = Duration::from_secs(self.config.timeouts.handshake_secs);
        let debugger = DapDebugger::connect(
            &info.host,
            info.port,
            timeout,
            self.config.channel.max_message_bytes(),
        )
        .await?;

        self.attach_debugger(Arc::new(debugger)).await?;
        if info.stop_on_start {
            tracing::info!(host = %info.host, port = info.port, "Worker paused on start; resume it from your debugger");
        }
        Ok(())
    }

    fn remove_side_channel(&mut self) {
        if let Some(name) = self.side_channel.take() {
            if let Err(e) = paths::remove_socket(&name) {
                tracing::debug!(error = %e, "Failed to remove side channel socket");
            }
        }
    }
}

impl Drop for WorkerProcessManager {
    fn drop(&mut self) {
        // The child is killed on drop; only the socket file needs cleanup
        self.remove_side_channel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::codec::{self, DEFAULT_MAX_MESSAGE};
    use crate::run::{LoggingExecutor, TestRun};
    use serde_json::json;
    use tokio::io::BufReader;

    fn connected() -> (WorkerProcessManager, ControlChannel) {
        let (left, right) = Transport::pair();
        let mut manager = WorkerProcessManager::new(Config::default(), SessionRegistry::new());
        manager.connect(left);
        let worker = ControlChannel::new(right, Config::default().channel.max_message_bytes());
        (manager, worker)
    }

    #[tokio::test]
    async fn test_get_tests_builds_suite() {
        let (manager, worker) = connected();
        worker.subscribe(Method::GetTests, |payload| async move {
            assert_eq!(payload["sources"], json!(["tests/a.yml"]));
            Ok(json!([
                {"id": "t1", "name": "one", "fixture": {"id": "f1", "name": "F", "beforeFn": true}},
                {"id": "t2", "name": "two", "fixture": {"id": "f1", "name": "F", "beforeFn": true}}
            ]))
        });
        worker.listen();

        let suite = manager.get_tests(&["tests/a.yml".to_string()]).await.unwrap();
        assert_eq!(suite.fixtures.len(), 1);
        assert_eq!(suite.tests.len(), 2);
        assert!(suite.fixtures[0].phases.before_fn.is_some());
    }

    #[tokio::test]
    async fn test_worker_crash_fails_in_flight_phase() {
        let (left, right) = Transport::pair();
        let mut manager = WorkerProcessManager::new(Config::default(), SessionRegistry::new());
        manager.connect(left);

        let run_id = TestRunId::from("r1");
        let call = manager.run_test("t1", Actor::Tests, Some(&run_id), "fn");
        let crash = async move {
            let Transport { primary, side } = right;
            let mut reader = BufReader::new(primary.reader);
            codec::read_message(&mut reader, DEFAULT_MAX_MESSAGE)
                .await
                .unwrap();
            // Split halves share one stream, so every half must go for EOF
            drop(reader);
            drop(primary.writer);
            drop(side);
        };

        let (result, ()) = tokio::join!(call, crash);
        assert!(matches!(result, Err(Error::WorkerTerminated { .. })));
        assert!(matches!(
            manager.clean_up().await,
            Err(Error::WorkerTerminated { .. })
        ));
    }

    #[tokio::test]
    async fn test_routes_are_installed() {
        let (mut manager, worker) = connected();
        let mut events = manager.take_event_receiver().unwrap();
        assert!(manager.take_event_receiver().is_none());

        let run = TestRun::new(
            TestRunId::from("r1"),
            "firefox",
            Arc::new(LoggingExecutor::new("firefox")),
        );
        let _registration = manager.registry().register(&run);

        let result = worker
            .send(
                Method::ExecuteCommand,
                json!({"id": "r1", "command": {"type": "maximize-window"}}),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"command": "maximize-window"}));

        worker
            .notify(Method::TestFileAdded, json!({"filename": "b.yml"}))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            WorkerEvent::TestFileAdded("b.yml".into())
        );
    }

    #[tokio::test]
    async fn test_not_started() {
        let manager = WorkerProcessManager::new(Config::default(), SessionRegistry::new());
        assert!(matches!(
            manager.get_tests(&[]).await,
            Err(Error::Internal(_))
        ));
    }
}
