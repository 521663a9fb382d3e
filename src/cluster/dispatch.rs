//! Command routing.
//!
//! A command goes to the node that owns its key's slot. Keyless commands
//! and unassigned slots go to a round-robin pick of the known nodes. A
//! redirect reply invalidates the topology and the command is resubmitted
//! against the refreshed table, up to a fixed number of times.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::node::NodeAddress;
use super::pool::ConnectionPool;
use super::slot::key_slot;
use super::topology::TopologyCache;
use crate::core::builder::ClusterConfig;
use crate::core::command::Cmd;
use crate::core::{Connection, Connector};
use crate::error::{DiscoveryError, DispatchError, TransportError};
use crate::proto::reply::Reply;

/// Routes commands to the node owning their slot.
#[derive(Debug)]
pub struct CommandDispatcher<C: Connector> {
    topology: TopologyCache,
    pool: ConnectionPool<C>,
    max_redirects: usize,
}

impl<C: Connector> CommandDispatcher<C> {
    /// Creates a dispatcher that starts from `seeds`.
    pub fn new(connector: C, seeds: Vec<NodeAddress>, config: &ClusterConfig) -> Self {
        Self {
            topology: TopologyCache::new(seeds, config.node_pruning),
            pool: ConnectionPool::new(connector, config.connect_timeout),
            max_redirects: config.max_redirects,
        }
    }

    /// The topology cache.
    pub fn topology(&self) -> &TopologyCache {
        &self.topology
    }

    /// The connection pool.
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Sends `cmd` to the node owning its key and returns the reply.
    ///
    /// # Errors
    ///
    /// Server error replies are returned as [`DispatchError::Server`].
    /// Discovery, connection and transport failures are returned as-is.
    #[instrument(skip_all, fields(command = %cmd.name()), level = "debug")]
    pub async fn dispatch(&self, cmd: Cmd) -> Result<Reply, DispatchError> {
        let slot = cmd.routing_key().map(key_slot);
        let reply = self
            .execute(slot, |conn| {
                let cmd = cmd.clone();
                async move { conn.send(cmd).await }
            })
            .await?;

        match reply {
            Reply::Error(message) => Err(DispatchError::Server { message }),
            reply => Ok(reply),
        }
    }

    /// Forces a topology rebuild.
    pub async fn refresh_topology(&self) -> Result<(), DiscoveryError> {
        self.topology.invalidate();
        self.topology.rebuild(&self.pool).await
    }

    /// Runs `op` against the node serving `slot` and follows redirects.
    ///
    /// Returns the first reply that is not a redirect.
    pub(crate) async fn execute<F, Fut>(&self, slot: Option<u16>, op: F) -> Result<Reply, DispatchError>
    where
        F: Fn(Arc<C::Connection>) -> Fut,
        Fut: Future<Output = Result<Reply, TransportError>>,
    {
        let mut redirects = 0;
        loop {
            self.topology.ensure_ready(&self.pool).await?;
            let (address, conn) = self.connection_for(slot).await?;

            let reply = op(conn)
                .await
                .map_err(|source| DispatchError::Transport { address, source })?;

            let Reply::Redirect(redirect) = reply else {
                return Ok(reply);
            };

            redirects += 1;
            if redirects > self.max_redirects {
                warn!(slot = redirect.slot, redirects, "redirect limit exceeded");
                return Err(DispatchError::TooManyRedirects { attempts: redirects });
            }
            debug!(
                kind = ?redirect.kind,
                slot = redirect.slot,
                target = %redirect.target,
                "redirected, refreshing topology"
            );
            self.topology.invalidate();
        }
    }

    /// Resolves the node serving `slot` and acquires its connection,
    /// falling back to one other known node if connecting fails.
    pub(crate) async fn connection_for(
        &self,
        slot: Option<u16>,
    ) -> Result<(NodeAddress, Arc<C::Connection>), DispatchError> {
        let owner = match slot {
            Some(slot) => {
                let owner = self.topology.resolve(slot).await;
                if owner.is_none() {
                    debug!(slot, "slot unassigned, routing to an arbitrary node");
                }
                owner
            }
            None => None,
        };
        let primary = match owner {
            Some(address) => address,
            None => self
                .topology
                .arbitrary_node(None)
                .await
                .ok_or(DiscoveryError::NoCandidates)?,
        };

        let err = match self.pool.acquire(&primary).await {
            Ok(conn) => return Ok((primary, conn)),
            Err(err) => err,
        };

        let Some(fallback) = self.topology.arbitrary_node(Some(&primary)).await else {
            return Err(DispatchError::Unavailable { source: err });
        };
        warn!(address = %primary, %fallback, error = %err, "connection failed, trying another node");

        match self.pool.acquire(&fallback).await {
            Ok(conn) => Ok((fallback, conn)),
            Err(source) => Err(DispatchError::Unavailable { source }),
        }
    }

    /// Closes all connections. Later commands fail.
    pub async fn shutdown(&self) {
        self.pool.terminate().await;
    }
}
