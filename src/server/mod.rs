//! HTTP server layer for the caster.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        POST /{mount} (publish)      GET /{mount} (subscribe)    │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │   routes    │  │        listener         │  │
//! │  │ (dispatch)  │  │  (router)   │  │   (plain + TLS serve)   │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod listener;
pub mod routes;

pub use handlers::{caster_handler, ErrorResponse, AUTH_REALM};
pub use listener::{load_tls_config, serve_http, serve_https, TlsConnectInfo, TlsListener};
pub use routes::{create_router, RouterConfig};
