//! Request/response multiplexer over a framed duplex stream
//!
//! The same type runs on both ends: the orchestrator drives the worker with
//! `get-tests`/`run-test` while the worker calls back with
//! `execute-command` and friends.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};

use crate::common::{Error, ErrorPayload, Result};

use super::codec;
use super::pending::PendingRequests;
use super::protocol::{Envelope, Message, Method, METHOD_NOT_FOUND};
use super::transport::{BoxedReader, BoxedWriter, Transport};

/// Async callback for one inbound message name
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

type RemoteOutcome = std::result::Result<Value, ErrorPayload>;

/// One end of the orchestrator ⇄ worker channel
#[derive(Clone)]
pub struct ControlChannel {
    inner: Arc<Inner>,
}

struct Inner {
    primary_writer: tokio::sync::Mutex<BoxedWriter>,
    side_writer: Option<tokio::sync::Mutex<BoxedWriter>>,
    readers: Mutex<Option<Readers>>,
    pending: PendingRequests<RemoteOutcome>,
    handlers: RwLock<HashMap<Method, Handler>>,
    notifications: mpsc::UnboundedSender<(Method, BoxFuture<'static, Result<Value>>)>,
    closed: watch::Sender<bool>,
    max_message: usize,
}

struct Readers {
    primary: BoxedReader,
    side: Option<BoxedReader>,
    notifications: mpsc::UnboundedReceiver<(Method, BoxFuture<'static, Result<Value>>)>,
}

impl ControlChannel {
    /// Wrap a transport; nothing is read until [`ControlChannel::listen`]
    pub fn new(transport: Transport, max_message: usize) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (side_reader, side_writer) = match transport.side {
            Some(side) => (Some(side.reader), Some(tokio::sync::Mutex::new(side.writer))),
            None => (None, None),
        };

        Self {
            inner: Arc::new(Inner {
                primary_writer: tokio::sync::Mutex::new(transport.primary.writer),
                side_writer,
                readers: Mutex::new(Some(Readers {
                    primary: transport.primary.reader,
                    side: side_reader,
                    notifications: notify_rx,
                })),
                pending: PendingRequests::new(Error::worker_terminated),
                handlers: RwLock::new(HashMap::new()),
                notifications: notify_tx,
                closed: watch::channel(false).0,
                max_message,
            }),
        }
    }

    /// Start the reader and dispatcher tasks
    ///
    /// Subscribe handlers first; messages that arrive before their handler
    /// is installed are refused. Later calls are no-ops.
    pub fn listen(&self) {
        let Some(readers) = self.inner.readers.lock().take() else {
            return;
        };

        tokio::spawn(read_loop(self.inner.clone(), readers.primary, true));
        if let Some(side) = readers.side {
            tokio::spawn(read_loop(self.inner.clone(), side, false));
        }
        tokio::spawn(dispatch_notifications(readers.notifications));
    }

    /// Register the async handler for an inbound message name
    pub fn subscribe<F, Fut>(&self, method: Method, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |payload: Value| handler(payload).boxed());
        self.inner.handlers.write().insert(method, boxed);
    }

    /// Send a request and wait for the correlated response
    pub async fn send(&self, method: Method, payload: Value) -> Result<Value> {
        self.listen();

        let (id, rx) = self.inner.pending.register()?;
        tracing::debug!(id, method = %method, "Sending request");

        if let Err(e) = self
            .inner
            .write_primary(&Envelope::request(id, method.as_str(), payload))
            .await
        {
            self.inner.pending.cancel(id);
            return Err(e);
        }

        match self.inner.pending.wait(rx).await? {
            Ok(result) => Ok(result),
            Err(payload) => Err(Error::from_payload(method.as_str(), payload)),
        }
    }

    /// Typed wrapper around [`ControlChannel::send`]
    pub async fn request<P, R>(&self, method: Method, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let result = self.send(method, serde_json::to_value(params)?).await?;
        serde_json::from_value(result).map_err(|e| {
            Error::Protocol(format!("Invalid '{}' response: {}", method, e))
        })
    }

    /// Send a message that expects no response
    pub async fn notify(&self, method: Method, payload: Value) -> Result<()> {
        self.listen();
        if self.inner.pending.is_terminated() {
            return Err(Error::worker_terminated("control channel closed"));
        }

        tracing::debug!(method = %method, "Sending notification");
        self.inner
            .write_primary(&Envelope::notification(method.as_str(), payload))
            .await
    }

    /// Whether the peer has gone away
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolve once the primary inbound stream has ended
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Handle that does not keep the channel alive
    ///
    /// Handlers stored on the channel use this to refer back to it.
    pub fn downgrade(&self) -> WeakControlChannel {
        WeakControlChannel {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

#[derive(Clone)]
pub struct WeakControlChannel {
    inner: Weak<Inner>,
}

impl WeakControlChannel {
    pub fn upgrade(&self) -> Option<ControlChannel> {
        self.inner.upgrade().map(|inner| ControlChannel { inner })
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("pending", &self.inner.pending)
            .field("side_channel", &self.inner.side_writer.is_some())
            .finish()
    }
}

impl Inner {
    async fn write_primary(&self, envelope: &Envelope) -> Result<()> {
        let json = self.encode(envelope)?;
        let mut writer = self.primary_writer.lock().await;
        if let Err(e) = codec::write_message(&mut *writer, &json).await {
            self.terminate(&e.to_string());
            return Err(Error::worker_terminated(&e.to_string()));
        }
        Ok(())
    }

    /// Responses prefer the side channel so they never wait behind a
    /// large primary write
    async fn write_response(&self, envelope: &Envelope) -> Result<()> {
        let Some(side) = &self.side_writer else {
            return self.write_primary(envelope).await;
        };

        let json = self.encode(envelope)?;
        let mut writer = side.lock().await;
        codec::write_message(&mut *writer, &json).await
    }

    fn encode(&self, envelope: &Envelope) -> Result<String> {
        let json = serde_json::to_string(envelope)?;
        if json.len() > self.max_message {
            return Err(Error::Protocol(format!(
                "Outgoing message too large: {} bytes (limit {})",
                json.len(),
                self.max_message
            )));
        }
        Ok(json)
    }

    fn terminate(&self, reason: &str) {
        let rejected = self.pending.terminate(reason);
        self.closed.send_replace(true);
        if rejected > 0 {
            tracing::warn!(rejected, reason, "Control channel terminated with requests in flight");
        } else {
            tracing::debug!(reason, "Control channel terminated");
        }
    }

    fn handler(&self, name: &str) -> std::result::Result<(Method, Handler), ErrorPayload> {
        let method = Method::parse(name).ok_or_else(|| {
            ErrorPayload::new(METHOD_NOT_FOUND, format!("Unknown method '{}'", name))
        })?;

        self.handlers
            .read()
            .get(&method)
            .cloned()
            .map(|handler| (method, handler))
            .ok_or_else(|| {
                ErrorPayload::new(METHOD_NOT_FOUND, format!("No handler for '{}'", name))
            })
    }

    fn dispatch(self: &Arc<Self>, json: &str) {
        let message = match Envelope::parse(json) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed control message");
                return;
            }
        };

        match message {
            Message::Response { id, outcome } => {
                if !self.pending.resolve(id, Ok(outcome)) {
                    tracing::warn!(id, "Response for unknown request");
                }
            }
            Message::Notification { method, payload } => match self.handler(&method) {
                Ok((method, handler)) => {
                    let _ = self.notifications.send((method, handler(payload)));
                }
                Err(e) => tracing::warn!(method = %method, error = %e.message, "Ignoring notification"),
            },
            Message::Request {
                id,
                method,
                payload,
            } => {
                let inner = self.clone();
                match self.handler(&method) {
                    Ok((method, handler)) => {
                        let call = handler(payload);
                        tokio::spawn(async move {
                            let outcome = call.await.map_err(|e| {
                                tracing::debug!(id, method = %method, error = %e, "Request handler failed");
                                ErrorPayload::from(&e)
                            });
                            inner.respond(id, outcome).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(id, method = %method, "Refusing unknown request");
                        tokio::spawn(async move { inner.respond(id, Err(e)).await });
                    }
                }
            }
        }
    }

    async fn respond(&self, id: u64, outcome: RemoteOutcome) {
        if let Err(e) = self.write_response(&Envelope::response(id, outcome)).await {
            tracing::warn!(id, error = %e, "Failed to write response");
        }
    }
}

async fn read_loop(inner: Arc<Inner>, reader: BoxedReader, primary: bool) {
    let mut reader = BufReader::new(reader);

    let reason = loop {
        match codec::read_message(&mut reader, inner.max_message).await {
            Ok(Some(json)) => {
                tracing::trace!(primary, "<<< {}", json);
                inner.dispatch(&json);
            }
            Ok(None) => break "peer closed the control channel".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    if primary {
        inner.terminate(&reason);
    } else {
        tracing::debug!(reason = %reason, "Side channel closed");
    }
}

async fn dispatch_notifications(
    mut rx: mpsc::UnboundedReceiver<(Method, BoxFuture<'static, Result<Value>>)>,
) {
    while let Some((method, call)) = rx.recv().await {
        if let Err(e) = call.await {
            tracing::warn!(method = %method, error = %e, "Notification handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::codec::DEFAULT_MAX_MESSAGE;
    use crate::channel::transport::Duplex;
    use serde_json::json;
    use std::time::Duration;

    fn connected() -> (ControlChannel, ControlChannel) {
        let (left, right) = Transport::pair();
        (
            ControlChannel::new(left, DEFAULT_MAX_MESSAGE),
            ControlChannel::new(right, DEFAULT_MAX_MESSAGE),
        )
    }

    async fn read_frame(reader: &mut BufReader<BoxedReader>) -> Value {
        let json = codec::read_message(reader, DEFAULT_MAX_MESSAGE)
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn test_request_response() {
        let (orchestrator, worker) = connected();
        worker.subscribe(Method::GetTests, |payload| async move {
            Ok(json!({"echo": payload}))
        });
        worker.listen();

        let result = orchestrator
            .send(Method::GetTests, json!({"sources": ["a.yml"]}))
            .await
            .unwrap();
        assert_eq!(result, json!({"echo": {"sources": ["a.yml"]}}));
        assert_eq!(orchestrator.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_are_correlated() {
        let (orchestrator, worker) = connected();
        worker.subscribe(Method::RunTest, |payload| async move {
            let delay = payload["delay"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(payload["idx"].clone())
        });
        worker.listen();

        let (slow, fast) = tokio::join!(
            orchestrator.send(Method::RunTest, json!({"idx": "slow", "delay": 80})),
            orchestrator.send(Method::RunTest, json!({"idx": "fast", "delay": 0})),
        );
        assert_eq!(slow.unwrap(), json!("slow"));
        assert_eq!(fast.unwrap(), json!("fast"));
    }

    #[tokio::test]
    async fn test_remote_error_maps_to_local_kind() {
        let (orchestrator, worker) = connected();
        worker.subscribe(Method::GetTests, |_| async move {
            Err(Error::Compilation("unexpected token".to_string()))
        });
        worker.listen();

        let err = orchestrator
            .send(Method::GetTests, json!({"sources": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Compilation(_)));
    }

    #[tokio::test]
    async fn test_peer_exit_rejects_all_pending() {
        let (left, right) = Transport::pair();
        let orchestrator = ControlChannel::new(left, DEFAULT_MAX_MESSAGE);

        let mut peer = BufReader::new(right.primary.reader);
        let first = tokio::spawn({
            let channel = orchestrator.clone();
            async move { channel.send(Method::RunTest, json!({"idx": "1"})).await }
        });
        let second = tokio::spawn({
            let channel = orchestrator.clone();
            async move { channel.send(Method::RunTest, json!({"idx": "2"})).await }
        });

        // Both requests reach the peer before it dies
        read_frame(&mut peer).await;
        read_frame(&mut peer).await;
        drop(peer);
        drop(right.primary.writer);
        drop(right.side);

        for handle in [first, second] {
            assert!(matches!(
                handle.await.unwrap(),
                Err(Error::WorkerTerminated { .. })
            ));
        }

        orchestrator.closed().await;
        assert!(orchestrator.is_closed());
        assert!(matches!(
            orchestrator.send(Method::CleanUp, Value::Null).await,
            Err(Error::WorkerTerminated { .. })
        ));
    }

    #[tokio::test]
    async fn test_notifications_run_in_arrival_order() {
        let (orchestrator, worker) = connected();
        let (tx, mut rx) = mpsc::unbounded_channel();

        orchestrator.subscribe(Method::TestFileAdded, move |payload| {
            let tx = tx.clone();
            async move {
                // Earlier notifications sleep longer; order must still hold
                let n = payload["n"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(30 - n * 10)).await;
                let _ = tx.send(n);
                Ok(Value::Null)
            }
        });
        orchestrator.listen();

        for n in 0..3 {
            worker
                .notify(Method::TestFileAdded, json!({"n": n}))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unknown_method_is_refused_on_side_channel() {
        let (left, right) = Transport::pair();
        let orchestrator = ControlChannel::new(left, DEFAULT_MAX_MESSAGE);
        orchestrator.listen();

        let mut peer_writer = right.primary.writer;
        let side = right.side.unwrap();
        let mut side_reader = BufReader::new(side.reader);

        codec::write_message(&mut peer_writer, r#"{"id":7,"method":"launch-browser"}"#)
            .await
            .unwrap();

        let response = read_frame(&mut side_reader).await;
        assert_eq!(response["id"], json!(7));
        assert_eq!(response["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_side_channel_response_bypasses_blocked_primary() {
        let (left, right) = Transport::pair_with_capacity(1024);
        let orchestrator = ControlChannel::new(left, DEFAULT_MAX_MESSAGE);
        orchestrator.subscribe(Method::ExecuteCommand, |_| async move { Ok(json!("done")) });
        orchestrator.listen();

        // Nobody drains the peer's primary inbound, so this write stalls
        let big = "x".repeat(64 * 1024);
        let stalled = tokio::spawn({
            let channel = orchestrator.clone();
            async move { channel.notify(Method::Debug, json!({"blob": big})).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stalled.is_finished());

        let Duplex {
            reader: _primary_reader,
            writer: mut peer_writer,
        } = right.primary;
        let mut side_reader = BufReader::new(right.side.unwrap().reader);

        codec::write_message(
            &mut peer_writer,
            r#"{"id":1,"method":"execute-command","payload":{}}"#,
        )
        .await
        .unwrap();

        let response = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut side_reader))
            .await
            .expect("response should not wait for the primary write");
        assert_eq!(response, json!({"id": 1, "result": "done"}));
        stalled.abort();
    }
}
