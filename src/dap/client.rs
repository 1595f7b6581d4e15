//! DAP client for the worker's debug endpoint
//!
//! Connects over TCP, runs the initialize/attach handshake, and turns
//! `stopped`/`continued` events into [`DebuggerEvent`]s for the bridge.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::channel::codec;
use crate::channel::pending::PendingRequests;
use crate::channel::transport::BoxedWriter;
use crate::common::{Error, Result};
use crate::debug::{DebuggerEvent, StepDebugger};

use super::types::*;

/// How long to wait for the adapter's `initialized` event
const INITIALIZED_TIMEOUT: Duration = Duration::from_secs(2);

/// Step debugger speaking DAP to the worker
pub struct DapDebugger {
    shared: Arc<Shared>,
    events: Mutex<Option<mpsc::UnboundedReceiver<DebuggerEvent>>>,
    /// Adapter capabilities (populated after initialize)
    pub capabilities: Capabilities,
}

struct Shared {
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: PendingRequests<ResponseMessage>,
    /// Thread of the most recent stop
    thread_id: AtomicI64,
    initialized: Notify,
    max_message: usize,
}

impl DapDebugger {
    /// Connect to `host:port`, retrying until `timeout` elapses
    pub async fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
        max_message: usize,
    ) -> Result<Self> {
        let deadline = Instant::now() + timeout;

        let stream = loop {
            match TcpStream::connect((host, port)).await {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    tracing::trace!(host, port, error = %e, "Debug endpoint not ready");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => {
                    return Err(Error::Debugger(format!(
                        "Failed to connect to {}:{}: {}",
                        host, port, e
                    )))
                }
            }
        };

        tracing::info!(host, port, "Connected to worker debug endpoint");
        let (reader, writer) = stream.into_split();
        let mut debugger = Self::from_streams(reader, writer, max_message);
        debugger.handshake(host, port).await?;
        Ok(debugger)
    }

    /// Start the reader tasks over an established stream pair
    pub fn from_streams<R, W>(reader: R, writer: W, max_message: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: PendingRequests::new(|reason| {
                Error::Debugger(format!("debug adapter disconnected: {}", reason))
            }),
            thread_id: AtomicI64::new(1),
            initialized: Notify::new(),
            max_message,
        });

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_loop(shared.clone(), BufReader::new(reader), raw_tx));
        tokio::spawn(translate_events(shared.clone(), raw_rx, event_tx));

        Self {
            shared,
            events: Mutex::new(Some(event_rx)),
            capabilities: Capabilities::default(),
        }
    }

    /// initialize → attach → configurationDone
    pub async fn handshake(&mut self, host: &str, port: u16) -> Result<()> {
        let args = InitializeArguments::default();
        self.capabilities = self
            .shared
            .request("initialize", Some(serde_json::to_value(&args)?))
            .await?;

        let attach = AttachArguments {
            address: host.to_string(),
            port,
            continue_on_attach: None,
        };
        self.shared
            .request::<Value>("attach", Some(serde_json::to_value(&attach)?))
            .await?;

        if tokio::time::timeout(INITIALIZED_TIMEOUT, self.shared.initialized.notified())
            .await
            .is_err()
        {
            tracing::debug!("No initialized event from debug adapter");
        }

        if self.capabilities.supports_configuration_done_request {
            self.shared
                .request::<Value>("configurationDone", None)
                .await?;
        }
        Ok(())
    }

    /// Disconnect without terminating the worker
    pub async fn disconnect(&self) -> Result<()> {
        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(false),
        };
        // Don't wait for response - adapter might close immediately
        let (seq, _rx) = self.shared.pending.register()?;
        self.shared
            .write(&RequestMessage::new(seq, "disconnect", Some(serde_json::to_value(&args)?)))
            .await
    }

    fn thread_id(&self) -> i64 {
        self.shared.thread_id.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepDebugger for DapDebugger {
    async fn pause(&self) -> Result<()> {
        let args = PauseArguments {
            thread_id: self.thread_id(),
        };
        self.shared
            .request::<Value>("pause", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let args = ContinueArguments {
            thread_id: self.thread_id(),
            single_thread: false,
        };
        self.shared
            .request::<Value>("continue", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    async fn step_out(&self) -> Result<()> {
        let args = StepArguments {
            thread_id: self.thread_id(),
            granularity: Some("statement".to_string()),
        };
        self.shared
            .request::<Value>("stepOut", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.disconnect().await
    }

    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<DebuggerEvent>> {
        self.events.lock().take()
    }
}

impl Shared {
    async fn write(&self, request: &RequestMessage) -> Result<()> {
        let json = serde_json::to_string(request)?;
        tracing::trace!("DAP >>> {}", json);
        let mut writer = self.writer.lock().await;
        codec::write_message(&mut *writer, &json).await
    }

    /// Send a request and wait for the response
    async fn request<T: DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let (seq, rx) = self.pending.register()?;
        if let Err(e) = self.write(&RequestMessage::new(seq, command, arguments)).await {
            self.pending.cancel(seq);
            return Err(e);
        }

        let response = self.pending.wait(rx).await?;
        if !response.success {
            return Err(Error::dap_request_failed(
                command,
                &response
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        let body = response.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| {
            Error::Debugger(format!("Failed to parse {} response: {}", command, e))
        })
    }

    async fn top_frame_path(&self, thread_id: i64) -> Result<Option<String>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: Some(1),
        };
        let body: StackTraceResponseBody = self
            .request("stackTrace", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(body
            .stack_frames
            .into_iter()
            .next()
            .and_then(|frame| frame.source)
            .and_then(|source| source.path))
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    shared: Arc<Shared>,
    mut reader: BufReader<R>,
    events: mpsc::UnboundedSender<Event>,
) {
    let reason = loop {
        let json = match codec::read_message(&mut reader, shared.max_message).await {
            Ok(Some(json)) => json,
            Ok(None) => break "connection closed".to_string(),
            Err(e) => break e.to_string(),
        };
        tracing::trace!("DAP <<< {}", json);

        let msg: Value = match serde_json::from_str(&json) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid JSON from debug adapter");
                continue;
            }
        };

        match msg.get("type").and_then(|v| v.as_str()).unwrap_or("unknown") {
            "response" => match serde_json::from_value::<ResponseMessage>(msg) {
                Ok(response) => {
                    shared.pending.resolve(response.request_seq, Ok(response));
                }
                Err(e) => tracing::warn!(error = %e, "Malformed DAP response"),
            },
            "event" => match serde_json::from_value::<EventMessage>(msg) {
                Ok(event) => {
                    let event = Event::from_message(&event);
                    if matches!(event, Event::Initialized) {
                        shared.initialized.notify_one();
                    }
                    let _ = events.send(event);
                }
                Err(e) => tracing::warn!(error = %e, "Malformed DAP event"),
            },
            other => tracing::warn!("Unknown message type: {}", other),
        }
    };

    shared.pending.terminate(&reason);
    tracing::debug!(reason = %reason, "Debug adapter connection closed");
}

/// Turns raw DAP events into bridge events
///
/// Runs apart from the reader so the stack lookup on a stop can wait for
/// its own response.
async fn translate_events(
    shared: Arc<Shared>,
    mut raw: mpsc::UnboundedReceiver<Event>,
    out: mpsc::UnboundedSender<DebuggerEvent>,
) {
    while let Some(event) = raw.recv().await {
        let translated = match event {
            Event::Stopped(body) => {
                let thread_id = body
                    .thread_id
                    .unwrap_or_else(|| shared.thread_id.load(Ordering::SeqCst));
                shared.thread_id.store(thread_id, Ordering::SeqCst);

                let top_frame_path = match shared.top_frame_path(thread_id).await {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::debug!(error = %e, "Could not read paused stack");
                        None
                    }
                };
                DebuggerEvent::Paused { top_frame_path }
            }
            Event::Continued { .. } => DebuggerEvent::Resumed,
            Event::Terminated => break,
            Event::Initialized | Event::Unknown { .. } => continue,
        };

        if out.send(translated).is_err() {
            break;
        }
    }
}
