use std::time::Duration;

use crate::cluster::{ClusterClient, NodeAddress};
use crate::core::connection::{TcpConnector, DEFAULT_QUEUE_SIZE};
use crate::core::Connector;
use crate::error::{Error, Result};

/// Default seed used when none is configured.
pub const DEFAULT_SEED: &str = "127.0.0.1:6379";

/// What happens to nodes that disappear from the cluster topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum NodePruning {
    /// Keep every node ever seen. Departed nodes stay candidates for
    /// discovery and fallback until the client is dropped.
    #[default]
    Retain,
    /// After each successful discovery, keep only the nodes it listed.
    PruneAbsent,
}

/// Tunables for routing, discovery and connection management.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub struct ClusterConfig {
    /// Upper bound on waiting for a node connection to become ready.
    pub connect_timeout: Duration,
    /// Redirects followed for one command before giving up.
    pub max_redirects: usize,
    /// Node set pruning policy.
    pub node_pruning: NodePruning,
    /// Request queue size of each TCP connection.
    pub queue_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_redirects: 16,
            node_pruning: NodePruning::Retain,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

/// Builder for configuring and creating a [`ClusterClient`].
///
/// # Example
///
/// ```no_run
/// use slotmux::ClusterBuilder;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClusterBuilder::new()
///     .seed("127.0.0.1:7000")
///     .seed("redis://127.0.0.1:7001")
///     .connect_timeout(Duration::from_secs(2))
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClusterBuilder {
    seeds: Vec<String>,
    config: ClusterConfig,
}

impl ClusterBuilder {
    /// Creates a new [`ClusterBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a seed node, as `host:port` or `redis://host:port`.
    #[inline]
    pub fn seed(mut self, address: impl Into<String>) -> Self {
        self.seeds.push(address.into());
        self
    }

    /// Adds seed nodes from a comma-separated list.
    pub fn seeds(mut self, addresses: &str) -> Self {
        self.seeds.extend(
            addresses
                .split(',')
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
                .map(String::from),
        );
        self
    }

    /// Sets the connection establishment timeout.
    #[inline]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets how many redirects one command may follow.
    #[inline]
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Sets the node pruning policy.
    #[inline]
    pub fn node_pruning(mut self, policy: NodePruning) -> Self {
        self.config.node_pruning = policy;
        self
    }

    /// Sets the request queue size of TCP connections.
    #[inline]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size;
        self
    }

    /// Replaces the whole configuration.
    #[inline]
    pub fn config(mut self, config: ClusterConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds a client over TCP without contacting the cluster.
    ///
    /// Topology is discovered on the first command.
    pub fn build(self) -> Result<ClusterClient<TcpConnector>> {
        let connector = TcpConnector::new(self.config.queue_size);
        self.build_with(connector)
    }

    /// Builds a client over a custom transport without contacting the cluster.
    pub fn build_with<C: Connector>(self, connector: C) -> Result<ClusterClient<C>> {
        if self.config.queue_size == 0 {
            return Err(Error::InvalidArgument {
                message: "queue size must be greater than zero".to_string(),
            });
        }

        let seeds = self.parse_seeds()?;
        Ok(ClusterClient::new(connector, seeds, self.config))
    }

    /// Builds a TCP client and discovers the cluster topology.
    ///
    /// # Errors
    ///
    /// Returns an error if a seed address is invalid or no seed node
    /// answers the topology query.
    pub async fn connect(self) -> Result<ClusterClient<TcpConnector>> {
        let client = self.build()?;
        client.refresh_topology().await?;
        Ok(client)
    }

    fn parse_seeds(&self) -> Result<Vec<NodeAddress>> {
        if self.seeds.is_empty() {
            return Ok(vec![DEFAULT_SEED.parse()?]);
        }
        self.seeds.iter().map(|seed| seed.parse()).collect()
    }
}
