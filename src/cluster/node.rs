//! Cluster node addressing.
//!
//! [`NodeAddress`] identifies a node by host and port; its `host:port`
//! string form is the key used for connection pooling. [`NodeSet`] is the
//! deduplicated, insertion-ordered collection of every node the router knows.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Network address of a cluster node.
///
/// Immutable once constructed. Two addresses are the same node when both
/// host and port are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    /// Creates a new address.
    ///
    /// Brackets around an IPv6 literal are stripped.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner.to_string(),
            None => host,
        };
        Self { host, port }
    }

    /// Returns the host name or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = Error;

    /// Parses `host:port`, `[v6]:port` or `redis://host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains("://") {
            return parse_url(s);
        }

        let (host, port) = s.rsplit_once(':').ok_or_else(|| Error::InvalidArgument {
            message: format!("missing port in address '{}'", s),
        })?;
        let port = port.parse::<u16>().map_err(|_| Error::InvalidArgument {
            message: format!("invalid port in address '{}'", s),
        })?;

        Ok(Self::new(host, port))
    }
}

fn parse_url(s: &str) -> Result<NodeAddress, Error> {
    let parsed = url::Url::parse(s).map_err(|_| Error::InvalidArgument {
        message: format!("invalid address format '{}'", s),
    })?;

    let scheme = parsed.scheme();
    if scheme != "redis" && scheme != "rediss" {
        return Err(Error::InvalidArgument {
            message: "invalid scheme, expected redis:// or rediss://".to_string(),
        });
    }

    let host = parsed.host_str().ok_or_else(|| Error::InvalidArgument {
        message: "missing host in address".to_string(),
    })?;

    Ok(NodeAddress::new(host, parsed.port().unwrap_or(6379)))
}

/// Insertion-ordered set of known cluster nodes.
///
/// Round-robin selection is driven by an explicit cursor supplied by the
/// caller, so the set itself carries no iteration state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    nodes: Vec<NodeAddress>,
}

impl NodeSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node unless an equal address is already present.
    ///
    /// Returns `true` if the node was new.
    pub fn insert(&mut self, node: NodeAddress) -> bool {
        if self.nodes.contains(&node) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Returns true if the address is known.
    pub fn contains(&self, node: &NodeAddress) -> bool {
        self.nodes.contains(node)
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeAddress> {
        self.nodes.iter()
    }

    /// Returns the node at `cursor` modulo the set size.
    pub fn pick(&self, cursor: usize) -> Option<&NodeAddress> {
        if self.nodes.is_empty() {
            return None;
        }
        self.nodes.get(cursor % self.nodes.len())
    }

    /// Returns every node once, starting at `cursor` and wrapping around.
    pub fn rotation(&self, cursor: usize) -> Vec<NodeAddress> {
        let len = self.nodes.len();
        (0..len)
            .map(|i| self.nodes[(cursor + i) % len].clone())
            .collect()
    }
}

impl FromIterator<NodeAddress> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeAddress>>(iter: I) -> Self {
        let mut set = Self::new();
        for node in iter {
            set.insert(node);
        }
        set
    }
}
