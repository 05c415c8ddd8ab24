//! HTTP request dispatch for the caster.
//!
//! Every request, whatever its path, lands in [`caster_handler`]:
//!
//! | Method | Condition              | Response                              |
//! |--------|------------------------|---------------------------------------|
//! | any    | authorizer rejects     | 401                                   |
//! | POST   | path free              | 200, request body becomes the source  |
//! | POST   | path occupied          | 409                                   |
//! | GET    | mountpoint exists      | 200, response body streams the data   |
//! | GET    | no mountpoint          | 404                                   |
//! | other  |                        | 501                                   |

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{CasterError, ConnectionError};
use crate::relay::{Caster, Connection, Mountpoint, RequestInfo};

/// Realm advertised in `WWW-Authenticate` challenges.
pub const AUTH_REALM: &str = "ntrip-caster";

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all protocol failures.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "conflict")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert a protocol failure into its HTTP response.
///
/// Suspicious authentication failures (bad password, bad signature) are logged
/// at WARN; everything else is routine for a caster and logged at DEBUG.
impl IntoResponse for CasterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = match &self {
            CasterError::Unauthorized(auth) => auth.error_type(),
            CasterError::Conflict(_) => "conflict",
            CasterError::NotFound(_) => "not_found",
            CasterError::NotImplemented(_) => "not_implemented",
        };
        let message = self.to_string();

        match &self {
            CasterError::Unauthorized(auth) if auth.is_suspicious() => warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            ),
            _ => debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Request rejected: {}",
                message
            ),
        }

        let body = Json(ErrorResponse::with_status(error_type, message, status));
        let mut response = (status, body).into_response();

        if matches!(self, CasterError::Unauthorized(_)) {
            let challenge = format!("Basic realm=\"{}\"", AUTH_REALM);
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Dispatch one publish or subscribe request.
///
/// Authorization happens before anything else; a rejected request never
/// touches the mountpoint registry.
pub async fn caster_handler(State(caster): State<Arc<Caster>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let conn = caster.connect(RequestInfo::from_parts(&parts));

    if let Err(err) = caster.authorize(&conn).await {
        return err.into_response();
    }

    match parts.method {
        Method::POST => publish(&caster, conn, body),
        Method::GET => subscribe(&caster, conn),
        method => CasterError::NotImplemented(method).into_response(),
    }
}

/// Register the request as a new mountpoint's source.
///
/// The 200 goes out straight away; the request body keeps feeding the source
/// conduit, and the response body stays open until the mountpoint closes the
/// source connection.
fn publish(caster: &Arc<Caster>, conn: Arc<Connection>, body: Body) -> Response {
    if let Err(err) = caster.publish(Arc::clone(&conn)) {
        return err.into_response();
    }

    tokio::spawn(feed_source(Arc::clone(&conn), body));

    let held_open = futures_util::stream::unfold(conn, |conn| async move {
        conn.closed().await;
        None::<(Result<Bytes, ConnectionError>, Arc<Connection>)>
    });
    stream_response(Body::from_stream(held_open))
}

/// Register the request as a subscriber and stream the mountpoint's data.
fn subscribe(caster: &Arc<Caster>, conn: Arc<Connection>) -> Response {
    let mount = match caster.subscribe(Arc::clone(&conn)) {
        Ok(mount) => mount,
        Err(err) => return err.into_response(),
    };

    let subscription = Subscription { mount, conn };
    let chunks = futures_util::stream::unfold(subscription, |subscription| async move {
        let chunk = subscription.conn.recv().await?;
        Some((chunk, subscription))
    });
    stream_response(Body::from_stream(chunks))
}

/// Pump the publisher's request body into its source conduit.
async fn feed_source(conn: Arc<Connection>, body: Body) {
    let mut data = body.into_data_stream();

    loop {
        let next = tokio::select! {
            _ = conn.closed() => break,
            next = data.next() => next,
        };

        match next {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => {
                if conn.send(chunk).await.is_err() {
                    break;
                }
            }
            Some(Err(err)) => {
                warn!(
                    mountpoint = %conn.request().path(),
                    connection = %conn.id(),
                    error = %err,
                    "Source body read failed"
                );
                let _ = conn
                    .send_error(ConnectionError::Transport(err.to_string()))
                    .await;
                break;
            }
            None => break,
        }
    }

    conn.finish();
}

fn stream_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// A subscriber's hold on its mountpoint; deregisters when the response ends.
struct Subscription {
    mount: Arc<Mountpoint>,
    conn: Arc<Connection>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.mount.deregister_subscriber(&self.conn) {
            debug!(
                mountpoint = %self.mount.path(),
                connection = %self.conn.id(),
                "Subscriber disconnected"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
