//! JSON-RPC 2.0 transport and multiplexer over newline-delimited JSON.
//!
//! [`JsonRpcClient`] owns both halves of the child's stdio pipes. It frames
//! inbound lines, correlates responses to outstanding [`JsonRpcClient::call`]s
//! by id, and dispatches inbound notifications/method calls to handlers
//! registered before [`JsonRpcClient::run`] starts. Notification handlers are
//! async and awaited in-line by the read loop, so a handler that backs up
//! (e.g. on a full downstream queue) applies backpressure directly onto the
//! read loop rather than being silently dropped or buffered unbounded.
//!
//! Handler registration is a one-shot builder step: [`on_notification`] and
//! [`on_method`] are meant to be called before the read loop is spawned, not
//! concurrently with it — the handler maps are read-only for the lifetime of
//! the loop.
//!
//! [`on_notification`]: JsonRpcClient::on_notification
//! [`on_method`]: JsonRpcClient::on_method

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, oneshot};

use crate::error::AcpError;

/// Method-not-found, per JSON-RPC 2.0.
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
/// Internal error — e.g. a handler's success result failed to marshal.
pub const ERR_INTERNAL: i32 = -32603;
/// Generic application error surfaced from a handler's `Err` return.
pub const ERR_APPLICATION: i32 = -32000;

/// A `{code, message}` error object as carried in an RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// An outbound request or notification envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A response to an outbound call, as delivered to the original caller.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// The generic inbound envelope; every frame parses into this before being
/// classified as a response, a method call, or a notification.
#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// A fully classified inbound message, handed to the incoming-message
/// consumer when no dedicated handler claims it (kept for parity with the
/// upstream channel-based dispatch style; most consumers register handlers
/// instead).
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: Option<u64>,
    pub method: Option<String>,
    pub params: Option<Value>,
}

impl IncomingMessage {
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    pub fn is_rpc_call(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }
}

type NotificationHandler =
    Arc<dyn Fn(Option<Value>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
type MethodHandler = Arc<
    dyn Fn(Option<Value>) -> Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>
        + Send
        + Sync,
>;

/// Default maximum wire frame size: 4 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

struct PendingTable {
    slots: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn insert(&self, id: u64, tx: oneshot::Sender<Response>) {
        self.slots.lock().await.insert(id, tx);
    }

    async fn remove(&self, id: u64) -> Option<oneshot::Sender<Response>> {
        self.slots.lock().await.remove(&id)
    }

    /// Delivers a response to its slot, dropping it silently if the id is
    /// unknown (already delivered, cancelled, or never allocated).
    async fn deliver(&self, id: u64, response: Response) {
        if let Some(tx) = self.slots.lock().await.remove(&id) {
            let _ = tx.send(response);
        }
    }

    /// Drains every remaining slot, closing each exactly once so a waiting
    /// caller observes connection-closed rather than hanging forever.
    async fn close_all(&self) {
        let mut slots = self.slots.lock().await;
        for (_, tx) in slots.drain() {
            drop(tx);
        }
    }
}

/// Bidirectional JSON-RPC client over a child process's stdio.
pub struct JsonRpcClient {
    writer: Mutex<Box<dyn tokio::io::AsyncWrite + Unpin + Send>>,
    pending: PendingTable,
    next_id: AtomicU64,
    notification_handlers: HashMap<String, NotificationHandler>,
    method_handlers: HashMap<String, MethodHandler>,
    max_message_size: usize,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl JsonRpcClient {
    /// Builds a client over the given reader/writer pair. The read loop is
    /// not started until [`run`](Self::run) is called, so handlers can still
    /// be registered after construction.
    pub fn new<W>(writer: W, max_message_size: usize) -> Self
    where
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        Self {
            writer: Mutex::new(Box::new(writer)),
            pending: PendingTable::new(),
            next_id: AtomicU64::new(1),
            notification_handlers: HashMap::new(),
            method_handlers: HashMap::new(),
            max_message_size,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx: Mutex::new(Some(done_rx)),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Registers a notification handler. Must be called before [`run`](Self::run).
    ///
    /// The handler is awaited in-line by the read loop (see [`run`](Self::run)),
    /// so a handler that blocks on a full downstream queue blocks the read
    /// loop itself — this is the mechanism by which backpressure on a slow
    /// consumer eventually stalls response delivery, per §5.
    pub fn on_notification<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.notification_handlers
            .insert(method.into(), Arc::new(move |params| Box::pin(handler(params))));
    }

    /// Registers a method-call handler. Must be called before [`run`](Self::run).
    pub fn on_method<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.method_handlers
            .insert(method.into(), Arc::new(move |params| Box::pin(handler(params))));
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_line(&self, value: &Value) -> Result<(), AcpError> {
        let mut line = serde_json::to_vec(value).map_err(AcpError::Encode)?;
        line.push(b'\n');
        let mut w = self.writer.lock().await;
        w.write_all(&line).await.map_err(AcpError::Write)?;
        w.flush().await.map_err(AcpError::Write)?;
        Ok(())
    }

    /// Issues an outbound request and awaits a matching response, a
    /// connection close, or cancellation — whichever occurs first.
    ///
    /// On cancellation the pending slot is removed and then drained
    /// non-blocking: if the response had already raced in, it is honored
    /// rather than lost.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<Response, AcpError> {
        let id = self.alloc_id();
        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(id, tx).await;

        let envelope = Request {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.to_string(),
            params,
        };
        if let Err(e) = self.write_line(&serde_json::to_value(&envelope)?).await {
            self.pending.remove(id).await;
            return Err(e);
        }

        tokio::select! {
            biased;
            res = &mut rx => {
                res.map_err(AcpError::from)
            }
            _ = cancel.cancelled() => {
                self.pending.remove(id).await;
                // No-loss drain: a response may have been delivered to `rx`
                // in the race between cancellation firing and this select
                // arm being polled.
                match rx.try_recv() {
                    Ok(response) => Ok(response),
                    Err(_) => Err(AcpError::Cancelled),
                }
            }
        }
    }

    /// Sends a notification; no response is awaited.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), AcpError> {
        let envelope = Request {
            jsonrpc: "2.0",
            id: None,
            method: method.to_string(),
            params,
        };
        self.write_line(&serde_json::to_value(&envelope)?).await
    }

    /// Sends a response to an inbound method call.
    pub async fn respond(
        &self,
        id: u64,
        result: Option<Value>,
        error: Option<RpcError>,
    ) -> Result<(), AcpError> {
        let mut obj = serde_json::Map::new();
        obj.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        obj.insert("id".to_string(), Value::from(id));
        if let Some(err) = error {
            obj.insert("error".to_string(), serde_json::to_value(err)?);
        } else {
            obj.insert("result".to_string(), result.unwrap_or(Value::Null));
        }
        self.write_line(&Value::Object(obj)).await
    }

    /// Signals waiters (e.g. a controller's `stop`) that the read loop has
    /// exited. Idempotent: only the first call has an effect.
    async fn close_done(&self) {
        if let Some(tx) = self.done_tx.lock().await.take() {
            let _ = tx.send(());
        }
        self.closed.store(true, Ordering::SeqCst);
        self.pending.close_all().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Replaces the writer with a no-op sink, dropping (and so closing) the
    /// original — used to send EOF on the child's stdin during termination
    /// without tearing down the rest of the client.
    pub async fn close_writer(&self) {
        let mut w = self.writer.lock().await;
        *w = Box::new(tokio::io::sink());
    }

    /// Takes the done-signal receiver; callers await this to know the read
    /// loop has exited and the pending table has been drained.
    pub async fn take_done(&self) -> Option<oneshot::Receiver<()>> {
        self.done_rx.lock().await.take()
    }

    /// Runs the read loop until EOF or a fatal frame error. Each line not
    /// beginning with `{` is treated as banner output and skipped; malformed
    /// JSON is reported via `on_parse_error` and does not end the loop.
    pub async fn run<R>(
        self: &Arc<Self>,
        reader: R,
        on_parse_error: impl Fn(&[u8], &serde_json::Error) + Send + Sync + 'static,
    ) -> Result<(), AcpError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let result = self.read_loop(&mut lines, &on_parse_error).await;
        self.close_done().await;
        result
    }

    async fn read_loop<R>(
        self: &Arc<Self>,
        lines: &mut tokio::io::Lines<BufReader<R>>,
        on_parse_error: &(impl Fn(&[u8], &serde_json::Error) + Send + Sync + 'static),
    ) -> Result<(), AcpError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(e) => return Err(AcpError::TransportClosed(e.to_string())),
            };

            if line.len() > self.max_message_size {
                return Err(AcpError::FrameTooLarge {
                    max: self.max_message_size,
                });
            }

            let trimmed = line.trim_start();
            if !trimmed.starts_with('{') {
                continue;
            }

            let envelope: Envelope = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(e) => {
                    on_parse_error(line.as_bytes(), &e);
                    continue;
                }
            };

            match (envelope.id, envelope.method) {
                (Some(id), None) => {
                    // Response to one of our outbound calls.
                    self.pending
                        .deliver(
                            id,
                            Response {
                                result: envelope.result,
                                error: envelope.error,
                            },
                        )
                        .await;
                }
                (Some(id), Some(method)) => {
                    // Inbound method call from the peer; dispatched on its
                    // own task so the read loop never blocks on handler work.
                    let this = Arc::clone(self);
                    let handler = self.method_handlers.get(&method).cloned();
                    tokio::spawn(async move {
                        let response = match handler {
                            None => Err(RpcError {
                                code: ERR_METHOD_NOT_FOUND,
                                message: format!("method not found: {method}"),
                                data: None,
                            }),
                            Some(h) => h(envelope.params).await,
                        };
                        let send_result = match response {
                            Ok(value) => this.respond(id, Some(value), None).await,
                            Err(rpc_err) => this.respond(id, None, Some(rpc_err)).await,
                        };
                        // Best-effort: the connection may already be closing.
                        let _ = send_result;
                    });
                }
                (None, Some(method)) => {
                    // Notification; awaited in-line (not spawned) to preserve
                    // wire-arrival order and to let a full downstream queue
                    // apply backpressure onto the read loop itself.
                    let handler = self.notification_handlers.get(&method).cloned();
                    if let Some(handler) = handler {
                        handler(envelope.params).await;
                    }
                }
                (None, None) => {
                    // Neither a call, a response, nor a notification we can
                    // route — not a protocol violation, just ignored.
                }
            }
        }
    }
}

/// Marshals a handler's success value, mapping a marshal failure to
/// `-32603` per §4.2.
pub fn marshal_result<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError {
        code: ERR_INTERNAL,
        message: format!("failed to marshal result: {e}"),
        data: None,
    })
}

/// Wraps an application error as an RPC error, per §4.2 (`-32000`).
pub fn application_error(message: impl Into<String>) -> RpcError {
    RpcError {
        code: ERR_APPLICATION,
        message: message.into(),
        data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_allocates_sequential_ids() {
        let (client_writer, _server_reader) = tokio::io::duplex(4096);
        let client = JsonRpcClient::new(client_writer, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(client.alloc_id(), 1);
        assert_eq!(client.alloc_id(), 2);
        assert_eq!(client.alloc_id(), 3);
    }

    #[tokio::test]
    async fn pending_table_drops_unknown_response() {
        let table = PendingTable::new();
        // Delivering to an id nobody is waiting on must not panic.
        table
            .deliver(
                42,
                Response {
                    result: None,
                    error: None,
                },
            )
            .await;
        assert!(table.slots.lock().await.is_empty());
    }

    #[tokio::test]
    async fn pending_table_cleanliness_after_remove() {
        let table = PendingTable::new();
        let (tx, _rx) = oneshot::channel();
        table.insert(7, tx).await;
        assert!(table.slots.lock().await.contains_key(&7));
        table.remove(7).await;
        assert!(!table.slots.lock().await.contains_key(&7));
    }

    #[tokio::test]
    async fn close_all_drains_every_slot() {
        let table = PendingTable::new();
        let (tx1, rx1) = oneshot::channel::<Response>();
        let (tx2, rx2) = oneshot::channel::<Response>();
        table.insert(1, tx1).await;
        table.insert(2, tx2).await;
        table.close_all().await;
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[test]
    fn rpc_error_display_includes_code() {
        let err = RpcError {
            code: -32601,
            message: "method not found: foo".to_string(),
            data: None,
        };
        assert!(err.to_string().contains("-32601"));
        assert!(err.to_string().contains("foo"));
    }
}
