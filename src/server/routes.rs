//! Router configuration for the caster.
//!
//! A caster has no fixed routes: every path names a mountpoint, so all
//! requests go through a single fallback handler.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ntrip_caster::auth::AllowAll;
//! use ntrip_caster::relay::{Caster, DEFAULT_TIMEOUT};
//! use ntrip_caster::server::{create_router, RouterConfig};
//!
//! let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));
//! let router = create_router(caster, RouterConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:2101").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers::caster_handler;
use crate::relay::Caster;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a router configuration with tracing enabled.
    pub fn new() -> Self {
        Self {
            enable_tracing: true,
        }
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the caster router.
///
/// Every method and path is dispatched by [`caster_handler`]; the optional
/// trace layer logs request spans through `tower_http`.
pub fn create_router(caster: Arc<Caster>, config: RouterConfig) -> Router {
    let router = Router::new().fallback(caster_handler).with_state(caster);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

// =============================================================================
// Tests
// =============================================================================
