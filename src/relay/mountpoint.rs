//! Mountpoints: one source, many subscribers.
//!
//! A mountpoint reads chunks from its source connection and hands every chunk,
//! unmodified and in order, to each registered subscriber. Each subscriber
//! send is bounded by the caster timeout on its own, so a stalled subscriber
//! is dropped without holding up the source or its siblings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::future::join_all;
use tracing::{debug, info};

use super::connection::{Connection, ConnectionId};
use crate::error::{ConnectionError, MountpointError};

/// Subscriber registry guarded by the mountpoint's lock.
///
/// `closed` lives under the same lock so that a registration can never slip in
/// after teardown has drained the map.
#[derive(Default)]
struct Subscribers {
    closed: bool,
    connections: HashMap<ConnectionId, Arc<Connection>>,
}

/// Relay state for a single named stream.
pub struct Mountpoint {
    path: String,
    source: Arc<Connection>,
    subscribers: RwLock<Subscribers>,
    bytes_relayed: AtomicU64,
    created_at: Instant,
}

impl Mountpoint {
    /// Create a mountpoint fed by `source`, named after the source's request path.
    pub fn new(source: Arc<Connection>) -> Self {
        Self {
            path: source.request().path().to_string(),
            source,
            subscribers: RwLock::new(Subscribers::default()),
            bytes_relayed: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &Arc<Connection> {
        &self.source
    }

    pub fn subscriber_count(&self) -> usize {
        self.read_subscribers().connections.len()
    }

    pub fn has_subscriber(&self, id: ConnectionId) -> bool {
        self.read_subscribers().connections.contains_key(&id)
    }

    /// Total payload bytes read from the source so far.
    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.read_subscribers().closed
    }

    // =========================================================================
    // Subscriber registry
    // =========================================================================

    /// Add a subscriber. Chunks already in flight are not replayed to it.
    ///
    /// Fails with [`MountpointError::Closed`] once the mountpoint is torn down.
    pub fn register_subscriber(&self, conn: Arc<Connection>) -> Result<(), MountpointError> {
        let mut subscribers = self.write_subscribers();
        if subscribers.closed {
            return Err(MountpointError::Closed);
        }

        let id = conn.id();
        subscribers.connections.insert(id, conn);

        info!(
            mountpoint = %self.path,
            connection = %id,
            subscribers = subscribers.connections.len(),
            "Subscriber registered"
        );
        Ok(())
    }

    /// Remove a subscriber and close its connection.
    ///
    /// Returns `false` if it was not registered. Once this returns, the
    /// subscriber's reader will not see any further chunk.
    pub fn deregister_subscriber(&self, conn: &Connection) -> bool {
        let removed = self.write_subscribers().connections.remove(&conn.id());
        conn.close();

        if removed.is_some() {
            debug!(
                mountpoint = %self.path,
                connection = %conn.id(),
                "Subscriber deregistered"
            );
        }
        removed.is_some()
    }

    // =========================================================================
    // Relay
    // =========================================================================

    /// Pull the next chunk from the source.
    ///
    /// Returns [`MountpointError::EndOfStream`] once the source has finished,
    /// [`MountpointError::Closed`] if the mountpoint was torn down, and passes
    /// transport errors through as [`MountpointError::Source`].
    pub async fn read_source_data(&self) -> Result<Bytes, MountpointError> {
        match self.source.recv().await {
            Some(Ok(chunk)) => {
                self.bytes_relayed
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                Ok(chunk)
            }
            Some(Err(err)) => Err(MountpointError::Source(err)),
            None if self.source.is_closed() => Err(MountpointError::Closed),
            None => Err(MountpointError::EndOfStream),
        }
    }

    /// Run one relay iteration: read a chunk and fan it out.
    ///
    /// The read is bounded by `timeout`; so is each subscriber's send, measured
    /// independently. Subscribers that fail or time out are deregistered and the
    /// iteration carries on. Returns the number of subscribers that received
    /// the chunk.
    pub async fn broadcast(&self, timeout: Duration) -> Result<usize, MountpointError> {
        let chunk = tokio::time::timeout(timeout, self.read_source_data())
            .await
            .map_err(|_| MountpointError::SourceReadTimeout(timeout))??;

        let subscribers: Vec<Arc<Connection>> = self
            .read_subscribers()
            .connections
            .values()
            .cloned()
            .collect();

        let sends = subscribers.iter().map(|conn| {
            let chunk = chunk.clone();
            async move {
                tokio::time::timeout(timeout, conn.send(chunk))
                    .await
                    .unwrap_or(Err(ConnectionError::Timeout(timeout)))
            }
        });
        let results = join_all(sends).await;

        let mut delivered = 0;
        for (conn, result) in subscribers.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(
                        mountpoint = %self.path,
                        connection = %conn.id(),
                        error = %err,
                        "Dropping subscriber"
                    );
                    self.deregister_subscriber(conn);
                }
            }
        }

        Ok(delivered)
    }

    /// Broadcast until the source ends, stalls, or fails, and return why.
    pub async fn relay(&self, timeout: Duration) -> MountpointError {
        loop {
            if let Err(reason) = self.broadcast(timeout).await {
                return reason;
            }
        }
    }

    /// Tear down: close the source and disconnect every subscriber.
    ///
    /// Returns the number of subscribers that were disconnected. Idempotent.
    pub fn close(&self) -> usize {
        let drained: Vec<Arc<Connection>> = {
            let mut subscribers = self.write_subscribers();
            subscribers.closed = true;
            subscribers.connections.drain().map(|(_, conn)| conn).collect()
        };

        self.source.close();
        for conn in &drained {
            conn.close();
        }
        drained.len()
    }

    fn read_subscribers(&self) -> std::sync::RwLockReadGuard<'_, Subscribers> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_subscribers(&self) -> std::sync::RwLockWriteGuard<'_, Subscribers> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Mountpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mountpoint")
            .field("path", &self.path)
            .field("source", &self.source.id())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
