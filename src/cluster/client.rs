//! Redis Cluster client implementation.
//!
//! This module provides the high-level client: slot-based routing,
//! transparent redirect handling and single-slot transactions.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::batch::BatchBuilder;
use super::dispatch::CommandDispatcher;
use super::node::NodeAddress;
use super::slot::key_slot;
use crate::core::builder::{ClusterBuilder, ClusterConfig};
use crate::core::command::{self, Cmd};
use crate::core::connection::TcpConnector;
use crate::core::Connector;
use crate::error::{DiscoveryError, DispatchError, Error, Result};
use crate::proto::reply::Reply;

/// Redis Cluster client.
///
/// Cheap to clone; clones share topology and connections.
pub struct ClusterClient<C: Connector = TcpConnector> {
    inner: Arc<CommandDispatcher<C>>,
}

impl ClusterClient<TcpConnector> {
    /// Connects to a Redis Cluster using seed nodes.
    ///
    /// The address can be a single node or a comma-separated list of nodes.
    /// The client will discover the full cluster topology from the seed nodes.
    ///
    /// # Arguments
    ///
    /// * `addresses` - Seed node addresses (e.g., "redis://127.0.0.1:7000,127.0.0.1:7001")
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An address cannot be parsed
    /// - No seed node answers the topology query
    pub async fn connect(addresses: &str) -> Result<Self> {
        ClusterBuilder::new().seeds(addresses).connect().await
    }
}

impl<C: Connector> ClusterClient<C> {
    pub(crate) fn new(connector: C, seeds: Vec<NodeAddress>, config: ClusterConfig) -> Self {
        Self {
            inner: Arc::new(CommandDispatcher::new(connector, seeds, &config)),
        }
    }

    /// The dispatcher behind this client.
    pub fn dispatcher(&self) -> &CommandDispatcher<C> {
        &self.inner
    }

    /// Sends an arbitrary command to the node owning its key.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::dispatch`].
    pub async fn dispatch(&self, cmd: Cmd) -> std::result::Result<Reply, DispatchError> {
        self.inner.dispatch(cmd).await
    }

    /// Starts a transaction. All keyed commands must share a slot.
    pub fn multi(&self) -> BatchBuilder<'_, C> {
        BatchBuilder::new(&self.inner)
    }

    /// Rediscovers the cluster topology now.
    pub async fn refresh_topology(&self) -> std::result::Result<(), DiscoveryError> {
        self.inner.refresh_topology().await
    }

    /// Returns the number of known nodes in the cluster.
    pub async fn node_count(&self) -> usize {
        self.inner.topology().nodes().await.len()
    }

    /// Checks if the cluster covers all slots (0-16383).
    pub async fn is_fully_covered(&self) -> bool {
        self.inner.topology().table().await.is_fully_covered()
    }

    /// Returns the node currently believed to own `key`.
    pub async fn owner_of(&self, key: impl AsRef<[u8]>) -> Option<NodeAddress> {
        self.inner.topology().resolve(key_slot(key)).await
    }

    /// Gets a string value from Redis.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to retrieve
    ///
    /// # Returns
    ///
    /// Returns the value if the key exists, or None if the key does not exist.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        match self.dispatch(command::get(key)).await? {
            Reply::Bulk(data) => Ok(Some(data)),
            Reply::Nil => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    /// Sets a string value in Redis.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to set
    /// * `value` - The value to store
    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        match self.dispatch(command::set(key, value)).await? {
            Reply::Status(_) => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    /// Deletes a key from Redis.
    ///
    /// # Returns
    ///
    /// Returns 1 if the key was deleted, 0 if the key did not exist.
    pub async fn del(&self, key: impl Into<Bytes>) -> Result<i64> {
        match self.dispatch(command::del(key)).await? {
            Reply::Integer(n) => Ok(n),
            other => Err(unexpected("DEL", &other)),
        }
    }

    /// Checks if a key exists in Redis.
    pub async fn exists(&self, key: impl Into<Bytes>) -> Result<bool> {
        match self.dispatch(command::exists(key)).await? {
            Reply::Integer(n) => Ok(n > 0),
            other => Err(unexpected("EXISTS", &other)),
        }
    }

    /// Closes all connections. Commands issued afterwards fail.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

fn unexpected(command: &str, reply: &Reply) -> Error {
    Error::UnexpectedReply {
        message: format!("unexpected response type for {}: {:?}", command, reply),
    }
}

impl<C: Connector> Clone for ClusterClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> fmt::Debug for ClusterClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("topology", self.inner.topology())
            .finish_non_exhaustive()
    }
}
