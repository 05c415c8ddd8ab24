//! The caster: mountpoint registry and publish/subscribe state machine.
//!
//! # Example
//!
//! ```ignore
//! use ntrip_caster::{AllowAll, Caster};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let caster = Arc::new(Caster::new(AllowAll, Duration::from_secs(5)));
//!
//! // Publish: the source connection becomes a new mountpoint
//! let source = caster.connect(request_info);
//! let mount = caster.publish(source)?;
//!
//! // Subscribe: register on the existing mountpoint
//! let subscriber = caster.connect(other_request_info);
//! caster.subscribe(Arc::clone(&subscriber))?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use super::connection::{Connection, RequestInfo, DEFAULT_CONDUIT_CAPACITY};
use super::mountpoint::Mountpoint;
use crate::auth::Authorizer;
use crate::error::{CasterError, MountpointError};

/// Default per-operation timeout for source reads and subscriber sends.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of mountpoints keyed by path.
pub struct Caster {
    mounts: RwLock<HashMap<String, Arc<Mountpoint>>>,
    authorizer: Arc<dyn Authorizer>,
    timeout: Duration,
    conduit_capacity: usize,
}

impl Caster {
    /// Create a caster with the given policy and per-operation timeout.
    pub fn new(authorizer: impl Authorizer + 'static, timeout: Duration) -> Self {
        Self {
            mounts: RwLock::new(HashMap::new()),
            authorizer: Arc::new(authorizer),
            timeout,
            conduit_capacity: DEFAULT_CONDUIT_CAPACITY,
        }
    }

    /// Set how many chunks each connection buffers.
    pub fn with_conduit_capacity(mut self, capacity: usize) -> Self {
        self.conduit_capacity = capacity.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn conduit_capacity(&self) -> usize {
        self.conduit_capacity
    }

    /// Create a connection for an inbound request.
    pub fn connect(&self, request: RequestInfo) -> Arc<Connection> {
        Arc::new(Connection::with_capacity(request, self.conduit_capacity))
    }

    /// Consult the authorizer. Nothing is mutated on failure.
    pub async fn authorize(&self, conn: &Connection) -> Result<(), CasterError> {
        self.authorizer
            .authorize(conn)
            .await
            .map_err(CasterError::Unauthorized)
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Insert a mountpoint under its path.
    ///
    /// Fails with [`CasterError::Conflict`] if the path is taken; the existing
    /// mountpoint is left untouched.
    pub fn add_mountpoint(&self, mount: Arc<Mountpoint>) -> Result<(), CasterError> {
        let mut mounts = self.write_mounts();
        if mounts.contains_key(mount.path()) {
            return Err(CasterError::Conflict(mount.path().to_string()));
        }
        mounts.insert(mount.path().to_string(), mount);
        Ok(())
    }

    pub fn get_mountpoint(&self, path: &str) -> Option<Arc<Mountpoint>> {
        self.read_mounts().get(path).cloned()
    }

    /// Remove a mountpoint and disconnect its source and subscribers.
    pub fn delete_mountpoint(&self, path: &str) -> Option<Arc<Mountpoint>> {
        let mount = self.write_mounts().remove(path)?;
        let disconnected = mount.close();

        info!(
            mountpoint = %path,
            subscribers = disconnected,
            "Mountpoint deleted"
        );
        Some(mount)
    }

    /// Paths of all live mountpoints, sorted.
    pub fn mountpoints(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.read_mounts().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Remove `mount` only if its path still maps to this very instance.
    fn remove_if_current(&self, mount: &Arc<Mountpoint>) -> bool {
        let mut mounts = self.write_mounts();
        let is_current = mounts
            .get(mount.path())
            .is_some_and(|current| Arc::ptr_eq(current, mount));
        if is_current {
            mounts.remove(mount.path());
        }
        is_current
    }

    // =========================================================================
    // Protocol
    // =========================================================================

    /// Turn `source` into a new mountpoint and start its relay loop.
    pub fn publish(
        self: &Arc<Self>,
        source: Arc<Connection>,
    ) -> Result<Arc<Mountpoint>, CasterError> {
        let mount = Arc::new(Mountpoint::new(Arc::clone(&source)));
        self.add_mountpoint(Arc::clone(&mount))?;

        info!(
            mountpoint = %mount.path(),
            connection = %source.id(),
            remote_addr = ?source.request().remote_addr(),
            user_agent = source.request().user_agent().unwrap_or("-"),
            ntrip_version = source.request().ntrip_version().unwrap_or("-"),
            "Source connected"
        );

        tokio::spawn(Arc::clone(self).run_mountpoint(Arc::clone(&mount)));
        Ok(mount)
    }

    /// Register `conn` as a subscriber on the mountpoint at its request path.
    pub fn subscribe(&self, conn: Arc<Connection>) -> Result<Arc<Mountpoint>, CasterError> {
        let path = conn.request().path().to_string();
        let mount = self
            .get_mountpoint(&path)
            .ok_or_else(|| CasterError::NotFound(path.clone()))?;

        mount
            .register_subscriber(conn)
            .map_err(|_| CasterError::NotFound(path))?;
        Ok(mount)
    }

    /// Relay until the source goes away, then tear the mountpoint down.
    async fn run_mountpoint(self: Arc<Self>, mount: Arc<Mountpoint>) {
        let reason = mount.relay(self.timeout).await;

        self.remove_if_current(&mount);
        let disconnected = mount.close();

        match reason {
            MountpointError::EndOfStream | MountpointError::Closed => info!(
                mountpoint = %mount.path(),
                reason = %reason,
                subscribers = disconnected,
                bytes = mount.bytes_relayed(),
                uptime_secs = mount.uptime().as_secs(),
                "Mountpoint closed"
            ),
            _ => warn!(
                mountpoint = %mount.path(),
                reason = %reason,
                subscribers = disconnected,
                bytes = mount.bytes_relayed(),
                uptime_secs = mount.uptime().as_secs(),
                "Mountpoint torn down"
            ),
        }
    }

    fn read_mounts(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Mountpoint>>> {
        self.mounts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_mounts(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Mountpoint>>> {
        self.mounts.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Caster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caster")
            .field("mounts", &self.mountpoints())
            .field("timeout", &self.timeout)
            .field("conduit_capacity", &self.conduit_capacity)
            .finish()
    }
}
