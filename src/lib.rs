//! # NTRIP Caster
//!
//! An HTTP relay for GNSS correction streams.
//!
//! A source publishes a continuous byte stream with `POST /{mount}`; any
//! number of clients receive that stream with `GET /{mount}`. Data is fanned
//! out per chunk, and a subscriber that cannot keep up within the caster
//! timeout is disconnected without affecting the others.
//!
//! ## Architecture
//!
//! - [`relay`] - connections, mountpoints and the caster registry
//! - [`auth`] - pluggable authorization policies
//! - [`server`] - Axum request dispatch, router and plain/TLS listeners
//! - [`config`] - CLI and configuration types
//! - [`error`] - error types for every layer
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ntrip_caster::{AllowAll, Caster, RouterConfig, DEFAULT_TIMEOUT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ntrip_caster::ListenError> {
//!     let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));
//!     caster.listen_http("0.0.0.0:2101", RouterConfig::default()).await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod relay;
pub mod server;

// Re-export commonly used types
pub use auth::{AllowAll, AuthError, Authorizer, BasicAuth, SignedUrlAuth};
pub use config::{AuthMode, Cli, Command, ServeConfig, SignConfig, SignOutputFormat};
pub use error::{CasterError, ConnectionError, ListenError, MountpointError};
pub use relay::{
    Caster, Chunk, Connection, ConnectionId, Mountpoint, RequestInfo, DEFAULT_CONDUIT_CAPACITY,
    DEFAULT_TIMEOUT, NTRIP_VERSION,
};
pub use server::{
    caster_handler, create_router, load_tls_config, serve_http, serve_https, ErrorResponse,
    RouterConfig, TlsConnectInfo, TlsListener,
};
