//! Connection pooling for Redis Cluster nodes.
//!
//! At most one live connection is kept per node. Connections are
//! multiplexed, so every caller routed to a node shares that handle.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument};

use super::node::NodeAddress;
use crate::core::{Connection, Connector};
use crate::error::ConnectError;

type Slot<T> = Arc<OnceCell<Arc<T>>>;

/// Lazily connects to nodes and shares one connection per node.
///
/// Concurrent [`acquire`](Self::acquire) calls for a node that is still
/// connecting wait for the same attempt. A failed attempt is not cached.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    connect_timeout: Duration,
    connections: Mutex<HashMap<String, Slot<C::Connection>>>,
    terminated: AtomicBool,
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates an empty pool.
    pub fn new(connector: C, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            connections: Mutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
        }
    }

    /// Returns the ready connection for `address`, connecting if needed.
    ///
    /// A cached connection that reports itself closed is replaced.
    ///
    /// # Errors
    ///
    /// Fails if the node cannot be reached within the connect timeout, or
    /// the pool was terminated.
    #[instrument(skip_all, fields(%address), level = "debug")]
    pub async fn acquire(&self, address: &NodeAddress) -> Result<Arc<C::Connection>, ConnectError> {
        let key = address.to_string();
        loop {
            if self.terminated.load(Ordering::Acquire) {
                return Err(ConnectError::Terminated);
            }

            let cell = {
                let mut connections = self.connections.lock().await;
                let cell = connections.entry(key.clone()).or_default();
                if cell.get().is_some_and(|conn| !conn.is_open()) {
                    debug!(%address, "replacing closed connection");
                    *cell = Arc::default();
                }
                cell.clone()
            };

            let conn = cell
                .get_or_try_init(|| async { self.open(address).await.map(Arc::new) })
                .await?
                .clone();

            // A shutdown may have drained the map while the connection was opening.
            let mut connections = self.connections.lock().await;
            if !self.terminated.load(Ordering::Acquire) {
                match connections.entry(key.clone()) {
                    Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), &cell) => return Ok(conn),
                    Entry::Vacant(entry) => {
                        entry.insert(cell);
                        return Ok(conn);
                    }
                    Entry::Occupied(_) => {}
                }
            }
            drop(connections);

            debug!(%address, "discarding connection opened during shutdown");
            conn.close().await;
        }
    }

    /// Opens a connection that the pool does not track.
    ///
    /// The caller owns it and should close it when done.
    pub async fn open_unpooled(&self, address: &NodeAddress) -> Result<C::Connection, ConnectError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(ConnectError::Terminated);
        }
        self.open(address).await
    }

    async fn open(&self, address: &NodeAddress) -> Result<C::Connection, ConnectError> {
        match tokio::time::timeout(self.connect_timeout, self.connector.connect(address)).await {
            Ok(Ok(conn)) => {
                debug!(%address, "node connection ready");
                Ok(conn)
            }
            Ok(Err(source)) => Err(ConnectError::Io {
                address: address.clone(),
                source,
            }),
            Err(_) => Err(ConnectError::Timeout {
                address: address.clone(),
                timeout: self.connect_timeout,
            }),
        }
    }

    /// Number of established pooled connections.
    pub async fn len(&self) -> usize {
        self.connections
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Returns true if no pooled connection is established.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Closes every pooled connection. Later acquires reconnect.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        let mut closed = 0;
        for (_, cell) in drained {
            if let Some(conn) = cell.get() {
                conn.close().await;
                closed += 1;
            }
        }
        info!(closed, "connection pool shut down");
    }

    /// Closes every pooled connection and refuses new ones.
    pub async fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.shutdown().await;
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connect_timeout", &self.connect_timeout)
            .field("terminated", &self.terminated.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
