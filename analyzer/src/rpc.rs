//! JSON-RPC session over the connected analyzer pipe.
//!
//! A session owns two tasks: a writer draining an outbound queue into the
//! pipe, and (after [`RpcSession::listen`]) a reader that routes responses to
//! their waiting requests and notifications to registered handlers.
//!
//! Shutdown happens in a fixed order: [`stop_listening`](RpcSession::stop_listening),
//! [`end`](RpcSession::end), [`dispose`](RpcSession::dispose). The owner kills the
//! process only after all three.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{CodecError, FrameReader, FrameWriter};
use crate::protocol::{self, Incoming, Notification, Request, ResponseError};

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Target for frame-level traffic tracing, enabled per session.
pub const TRACE_TARGET: &str = "konveyor_analyzer::rpc::trace";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC session is closed")]
    Closed,
    #[error("analyzer returned error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("failed to encode {method} message: {source}")]
    Encode {
        method: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn remote_error(err: ResponseError) -> RpcError {
    RpcError::Remote {
        code: err.code,
        message: err.message,
        data: err.data,
    }
}

type NotificationHandler = Box<dyn Fn(Option<Value>) + Send + Sync>;
type UnhandledHandler = Box<dyn Fn(&str, Option<Value>) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(&RpcError) + Send + Sync>;
type CloseHandler = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Handlers {
    notifications: HashMap<String, NotificationHandler>,
    unhandled: Option<UnhandledHandler>,
    error: Option<ErrorHandler>,
    close: Option<CloseHandler>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ResponseError>>>>>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

enum WriterCommand {
    Send(Value),
    Shutdown,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RpcSession {
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: AtomicU64,
    pending: PendingMap,
    handlers: Arc<Mutex<Handlers>>,
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<BoxedReader>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    trace: bool,
}

impl RpcSession {
    /// Wrap a connected stream. Outbound messages flow immediately; inbound
    /// frames are not read until [`listen`](Self::listen) is called.
    pub fn new<S>(stream: S, trace: bool) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let writer_task = tokio::spawn(write_loop(write_half, writer_rx, trace));

        Self {
            writer_tx,
            next_id: AtomicU64::new(1),
            pending: Arc::default(),
            handlers: Arc::default(),
            closed: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(Some(Box::new(read_half))),
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(Some(writer_task)),
            trace,
        }
    }

    pub fn on_notification(
        &self,
        method: &str,
        handler: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) {
        lock(&self.handlers)
            .notifications
            .insert(method.to_string(), Box::new(handler));
    }

    /// Catch-all for notifications with no registered handler.
    pub fn on_unhandled_notification(
        &self,
        handler: impl Fn(&str, Option<Value>) + Send + Sync + 'static,
    ) {
        lock(&self.handlers).unhandled = Some(Box::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&RpcError) + Send + Sync + 'static) {
        lock(&self.handlers).error = Some(Box::new(handler));
    }

    /// Called once when the peer closes the pipe or reading fails.
    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) {
        lock(&self.handlers).close = Some(Box::new(handler));
    }

    pub fn listen(&self) {
        let Some(reader) = lock(&self.reader).take() else {
            tracing::warn!("RPC session is already listening");
            return;
        };
        let task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.pending),
            Arc::clone(&self.handlers),
            self.writer_tx.clone(),
            Arc::clone(&self.closed),
            self.trace,
        ));
        *lock(&self.reader_task) = Some(task);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), RpcError> {
        let frame = serde_json::to_value(Notification::new(method, params)).map_err(|source| {
            RpcError::Encode {
                method: method.to_string(),
                source,
            }
        })?;
        self.enqueue(frame).await
    }

    /// Send a request and wait for its response.
    ///
    /// Dropping the returned future forgets the request locally; nothing is
    /// sent to the server, which still completes the work.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            id,
        };

        // The reader marks the session closed before draining `pending`, so
        // an entry inserted after the drain is caught here.
        if self.is_closed() {
            return Err(RpcError::Closed);
        }

        let frame = serde_json::to_value(Request::new(id, method, params)).map_err(|source| {
            RpcError::Encode {
                method: method.to_string(),
                source,
            }
        })?;
        self.enqueue(frame).await?;

        match rx.await {
            Ok(outcome) => outcome.map_err(remote_error),
            Err(_) => Err(RpcError::Closed),
        }
    }

    async fn enqueue(&self, frame: Value) -> Result<(), RpcError> {
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| RpcError::Closed)
    }

    /// Stop reading inbound frames.
    pub fn stop_listening(&self) {
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
    }

    /// Flush queued messages and close the write side of the pipe.
    pub async fn end(&self) {
        if self.writer_tx.send(WriterCommand::Shutdown).await.is_err() {
            return;
        }
        let task = lock(&self.writer_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Release handlers and fail every outstanding request.
    pub fn dispose(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
        *lock(&self.handlers) = Handlers::default();
        if let Some(task) = lock(&self.writer_task).take() {
            task.abort();
        }
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        self.stop_listening();
        if let Some(task) = lock(&self.writer_task).take() {
            task.abort();
        }
    }
}

struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

async fn write_loop<W>(writer: W, mut rx: mpsc::Receiver<WriterCommand>, trace: bool)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = FrameWriter::new(writer);
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Send(frame) => {
                if trace {
                    tracing::trace!(target: TRACE_TARGET, direction = "send", %frame);
                }
                if let Err(err) = writer.write_frame(&frame).await {
                    tracing::warn!("Analyzer RPC write failed: {err}");
                    break;
                }
            }
            WriterCommand::Shutdown => {
                if let Err(err) = writer.close().await {
                    tracing::debug!("Closing analyzer RPC pipe: {err}");
                }
                break;
            }
        }
    }
}

async fn read_loop(
    reader: BoxedReader,
    pending: PendingMap,
    handlers: Arc<Mutex<Handlers>>,
    writer_tx: mpsc::Sender<WriterCommand>,
    closed: Arc<AtomicBool>,
    trace: bool,
) {
    let mut reader = FrameReader::new(reader);
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                if trace {
                    tracing::trace!(target: TRACE_TARGET, direction = "recv", %frame);
                }
                dispatch(&frame, &pending, &handlers, &writer_tx).await;
            }
            Ok(None) => {
                tracing::debug!("Analyzer closed the RPC pipe");
                break;
            }
            Err(err) => {
                let err = RpcError::Codec(err);
                tracing::warn!("Analyzer RPC read failed: {err}");
                if let Some(on_error) = &lock(&handlers).error {
                    on_error(&err);
                }
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    lock(&pending).clear();
    if let Some(on_close) = &lock(&handlers).close {
        on_close();
    }
}

async fn dispatch(
    frame: &Value,
    pending: &PendingMap,
    handlers: &Mutex<Handlers>,
    writer_tx: &mpsc::Sender<WriterCommand>,
) {
    let Some(incoming) = protocol::classify(frame) else {
        tracing::trace!("Ignoring malformed JSON-RPC frame from analyzer");
        return;
    };

    match incoming {
        Incoming::Response { id, outcome } => {
            let sender = lock(pending).remove(&id);
            match sender {
                Some(tx) => {
                    let _ = tx.send(outcome);
                }
                None => tracing::debug!(id, "Dropping response for unknown request"),
            }
        }
        Incoming::ServerRequest { id, method } => {
            tracing::debug!(%method, "Analyzer sent a request; replying method not found");
            let response = protocol::method_not_found(id, &method);
            let _ = writer_tx.send(WriterCommand::Send(response)).await;
        }
        Incoming::Notification { method, params } => notify(handlers, &method, params),
    }
}

fn notify(handlers: &Mutex<Handlers>, method: &str, params: Option<Value>) {
    let handlers = lock(handlers);
    if let Some(handler) = handlers.notifications.get(method) {
        handler(params);
    } else if let Some(unhandled) = &handlers.unhandled {
        unhandled(method, params);
    } else {
        tracing::trace!(method, "Ignoring analyzer notification");
    }
}
