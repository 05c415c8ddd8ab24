//! Connections and their byte-chunk conduits.
//!
//! A [`Connection`] wraps one inbound HTTP request, publisher or subscriber,
//! and carries the bytes of the stream between the request's own task and the
//! owning mountpoint's relay loop:
//!
//! ```text
//!  source:      request body ──► conduit ──► Mountpoint::read_source_data
//!  subscriber:  Mountpoint::broadcast ──► conduit ──► response body
//! ```
//!
//! Each conduit has exactly one writer and one reader. Timeouts are applied
//! by the caller around [`Connection::send`] and [`Connection::recv`]; the
//! conduit itself only ever waits for capacity, data, or closure.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use axum::extract::ConnectInfo;
use bytes::Bytes;
use http::header::USER_AGENT;
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use tokio::sync::{mpsc, watch};

use crate::error::ConnectionError;
use crate::server::listener::TlsConnectInfo;

/// Default number of chunks a conduit buffers before a writer has to wait.
pub const DEFAULT_CONDUIT_CAPACITY: usize = 64;

/// The NTRIP protocol version header sent by NTRIP 2.0 clients and servers.
pub const NTRIP_VERSION: HeaderName = HeaderName::from_static("ntrip-version");

/// One item moving through a conduit.
pub type Chunk = Result<Bytes, ConnectionError>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// ConnectionId
// =============================================================================

/// Process-unique identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// RequestInfo
// =============================================================================

/// Immutable request metadata captured when a connection is created.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
}

impl RequestInfo {
    /// Create request metadata from a method and URI, with no headers.
    pub fn new(method: Method, uri: &Uri) -> Self {
        Self {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }

    /// Capture metadata from the head of an HTTP request.
    ///
    /// The remote address is taken from axum's `ConnectInfo` extension, plain or
    /// TLS, when the server was started with connect info.
    pub fn from_parts(parts: &Parts) -> Self {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<TlsConnectInfo>>()
                    .map(|ConnectInfo(TlsConnectInfo(addr))| *addr)
            });

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            remote_addr,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The URL path, used verbatim as the mountpoint name.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header_str(&USER_AGENT)
    }

    /// Value of the `Ntrip-Version` header, e.g. `Ntrip/2.0`.
    pub fn ntrip_version(&self) -> Option<&str> {
        self.header_str(&NTRIP_VERSION)
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

// =============================================================================
// Connection
// =============================================================================

/// One publisher or subscriber request and its conduit.
pub struct Connection {
    id: ConnectionId,
    request: RequestInfo,
    /// Writer side; `None` once the writer has finished or the connection closed
    sender: Mutex<Option<mpsc::Sender<Chunk>>>,
    /// Reader side; there is only ever one reader, the lock just grants `&mut`
    receiver: tokio::sync::Mutex<mpsc::Receiver<Chunk>>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new(request: RequestInfo) -> Self {
        Self::with_capacity(request, DEFAULT_CONDUIT_CAPACITY)
    }

    /// Create a connection whose conduit buffers up to `capacity` chunks.
    pub fn with_capacity(request: RequestInfo, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);

        Self {
            id: ConnectionId::next(),
            request,
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Write a chunk into the conduit, waiting for capacity.
    ///
    /// Fails with [`ConnectionError::Closed`] if the connection is closed before
    /// or while waiting, or if the reader has gone away.
    pub async fn send(&self, chunk: Bytes) -> Result<(), ConnectionError> {
        self.push(Ok(chunk)).await
    }

    /// Pass a transport failure to the reader, which surfaces it as-is.
    pub async fn send_error(&self, error: ConnectionError) -> Result<(), ConnectionError> {
        self.push(Err(error)).await
    }

    async fn push(&self, item: Chunk) -> Result<(), ConnectionError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ConnectionError::Closed)?;

        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(ConnectionError::Closed),
            sent = sender.send(item) => sent.map_err(|_| ConnectionError::Closed),
        }
    }

    /// Read the next item from the conduit.
    ///
    /// Returns `None` once the writer has finished and the buffer is drained,
    /// or as soon as the connection is closed. Nothing is delivered after close.
    pub async fn recv(&self) -> Option<Chunk> {
        let mut closed = self.closed.subscribe();
        let mut receiver = self.receiver.lock().await;

        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => None,
            chunk = receiver.recv() => chunk,
        }
    }

    /// Non-blocking read; `None` if nothing is buffered or the connection is closed.
    pub fn try_recv(&self) -> Option<Chunk> {
        if self.is_closed() {
            return None;
        }
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Mark the writer side as done. The reader drains what is buffered, then sees
    /// end of stream.
    pub fn finish(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Close the connection and its conduit.
    ///
    /// Returns `true` only for the call that actually closed it; later calls are
    /// no-ops.
    pub fn close(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        self.finish();
        !was_closed
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the connection has been closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
