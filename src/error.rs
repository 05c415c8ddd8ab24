use std::time::Duration;

use http::{Method, StatusCode};
use thiserror::Error;

use crate::auth::AuthError;

/// Errors raised by a connection's conduit.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The connection has been closed; no more chunks can be moved through it
    #[error("connection closed")]
    Closed,

    /// The peer could not accept a chunk within the allowed window
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying HTTP transport failed while reading or writing the body
    #[error("transport error: {0}")]
    Transport(String),
}

/// Conditions that end a mountpoint's relay loop.
#[derive(Debug, Clone, Error)]
pub enum MountpointError {
    /// The source finished its body cleanly
    #[error("end of stream")]
    EndOfStream,

    /// No chunk arrived from the source within the configured window
    #[error("timeout reading from source after {0:?}")]
    SourceReadTimeout(Duration),

    /// The source connection reported a transport failure
    #[error("source error: {0}")]
    Source(ConnectionError),

    /// The mountpoint was torn down, explicitly or by a previous failure
    #[error("mountpoint closed")]
    Closed,
}

impl MountpointError {
    /// Whether this condition is a clean shutdown rather than a failure.
    pub fn is_clean_shutdown(&self) -> bool {
        matches!(self, MountpointError::EndOfStream)
    }
}

/// Protocol-level outcomes of a publish or subscribe request.
///
/// Each variant maps onto exactly one HTTP status code at the dispatch boundary.
#[derive(Debug, Clone, Error)]
pub enum CasterError {
    /// The authorizer rejected the request (401)
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// A mountpoint already exists at this path (409)
    #[error("mountpoint already in use: {0}")]
    Conflict(String),

    /// No mountpoint exists at this path (404)
    #[error("mountpoint not found: {0}")]
    NotFound(String),

    /// The request method has no meaning for the caster (501)
    #[error("method not implemented: {0}")]
    NotImplemented(Method),
}

impl CasterError {
    /// The HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CasterError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CasterError::Conflict(_) => StatusCode::CONFLICT,
            CasterError::NotFound(_) => StatusCode::NOT_FOUND,
            CasterError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

/// Errors while binding or running a listener.
#[derive(Debug, Error)]
pub enum ListenError {
    /// Could not bind the listening socket
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server loop failed
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate or key could not be loaded, or the TLS config was rejected
    #[error("TLS configuration error: {0}")]
    Tls(String),
}
