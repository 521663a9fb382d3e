//! In-memory cluster for tests.
//!
//! [`MockCluster`] implements [`Connector`] without any sockets. Every node
//! answers `CLUSTER NODES` with the same scripted topology; other commands
//! get queued replies, or `+OK` once the queue for that node is empty.
//!
//! ```
//! # #[cfg(feature = "test-utils")]
//! # #[tokio::main]
//! # async fn main() {
//! use slotmux::testing::MockCluster;
//! use slotmux::{ClusterBuilder, Reply};
//!
//! let mock = MockCluster::with_topology(&[("10.0.0.1:7000", "0-16383")]);
//! mock.push_reply("10.0.0.1:7000", Reply::Bulk("bar".into()));
//!
//! let client = ClusterBuilder::new()
//!     .seed("10.0.0.1:7000")
//!     .build_with(mock.clone())
//!     .unwrap();
//! assert_eq!(client.get("foo").await.unwrap(), Some(bytes::Bytes::from("bar")));
//! # }
//! # #[cfg(not(feature = "test-utils"))]
//! # fn main() {}
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::cluster::NodeAddress;
use crate::core::command::Cmd;
use crate::core::{Connection, Connector};
use crate::error::TransportError;
use crate::proto::reply::Reply;

/// Formats one `CLUSTER NODES` line for a master owning `slots`.
pub fn cluster_nodes_line(id: &str, address: &str, slots: &str) -> String {
    let cport = address
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u32>().ok())
        .map_or(0, |port| port + 10000);
    format!("{id} {address}@{cport} master - 0 0 1 connected {slots}")
}

#[derive(Debug)]
struct MockState {
    topology: String,
    recording: bool,
    unreachable: HashSet<String>,
    failing_discovery: HashSet<String>,
    replies: HashMap<String, VecDeque<Reply>>,
    connect_delay: Duration,
    connect_attempts: HashMap<String, usize>,
    connects: HashMap<String, usize>,
    discovery_queries: usize,
    sent: Vec<(String, Cmd)>,
    transactions: Vec<(String, Vec<Cmd>)>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            topology: String::new(),
            recording: true,
            unreachable: HashSet::new(),
            failing_discovery: HashSet::new(),
            replies: HashMap::new(),
            connect_delay: Duration::ZERO,
            connect_attempts: HashMap::new(),
            connects: HashMap::new(),
            discovery_queries: 0,
            sent: Vec::new(),
            transactions: Vec::new(),
        }
    }
}

/// A scriptable fake cluster. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
}

impl MockCluster {
    /// Creates a cluster with an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cluster whose topology lists one master per
    /// `(address, slots)` pair.
    pub fn with_topology(masters: &[(&str, &str)]) -> Self {
        let mock = Self::new();
        mock.set_masters(masters);
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the topology with one master per `(address, slots)` pair.
    pub fn set_masters(&self, masters: &[(&str, &str)]) {
        let text = masters
            .iter()
            .enumerate()
            .map(|(i, (address, slots))| cluster_nodes_line(&format!("node{i}"), address, slots))
            .collect::<Vec<_>>()
            .join("\n");
        self.set_topology(text);
    }

    /// Replaces the raw `CLUSTER NODES` reply.
    pub fn set_topology(&self, text: impl Into<String>) {
        self.state().topology = text.into();
    }

    /// Makes connects to `address` fail (or succeed again).
    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut state = self.state();
        if unreachable {
            state.unreachable.insert(address.to_string());
        } else {
            state.unreachable.remove(address);
        }
    }

    /// Makes `address` answer `CLUSTER NODES` with an error.
    pub fn fail_discovery(&self, address: &str) {
        self.state().failing_discovery.insert(address.to_string());
    }

    /// Delays every connect attempt.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    /// Stops (or resumes) recording commands for [`sent`](Self::sent) and
    /// [`transactions`](Self::transactions).
    pub fn set_recording(&self, recording: bool) {
        self.state().recording = recording;
    }

    /// Queues the reply to the next command or transaction sent to `address`.
    pub fn push_reply(&self, address: &str, reply: Reply) {
        self.state()
            .replies
            .entry(address.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Connect attempts to `address`, successful or not.
    pub fn connect_attempts(&self, address: &str) -> usize {
        self.state().connect_attempts.get(address).copied().unwrap_or(0)
    }

    /// Successful connects to `address`.
    pub fn connect_count(&self, address: &str) -> usize {
        self.state().connects.get(address).copied().unwrap_or(0)
    }

    /// `CLUSTER NODES` queries received by any node.
    pub fn discovery_count(&self) -> usize {
        self.state().discovery_queries
    }

    /// Commands other than `CLUSTER NODES`, with the node that received them.
    pub fn sent(&self) -> Vec<(String, Cmd)> {
        self.state().sent.clone()
    }

    /// Commands received by `address`.
    pub fn sent_to(&self, address: &str) -> Vec<Cmd> {
        self.state()
            .sent
            .iter()
            .filter(|(to, _)| to == address)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    /// Transactions received, with the node that received them.
    pub fn transactions(&self) -> Vec<(String, Vec<Cmd>)> {
        self.state().transactions.clone()
    }
}

impl Connector for MockCluster {
    type Connection = MockConnection;

    fn connect<'a>(&'a self, address: &'a NodeAddress) -> BoxFuture<'a, io::Result<MockConnection>> {
        async move {
            let key = address.to_string();
            let delay = {
                let mut state = self.state();
                *state.connect_attempts.entry(key.clone()).or_default() += 1;
                state.connect_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state();
            if state.unreachable.contains(&key) {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{key} is unreachable"),
                ));
            }
            *state.connects.entry(key.clone()).or_default() += 1;
            Ok(MockConnection {
                address: key,
                cluster: self.clone(),
                open: AtomicBool::new(true),
            })
        }
        .boxed()
    }
}

/// A connection to one node of a [`MockCluster`].
#[derive(Debug)]
pub struct MockConnection {
    address: String,
    cluster: MockCluster,
    open: AtomicBool,
}

fn is_cluster_nodes(cmd: &Cmd) -> bool {
    cmd.name().eq_ignore_ascii_case("CLUSTER")
        && cmd
            .args()
            .first()
            .and_then(|arg| arg.first())
            .is_some_and(|sub| sub.eq_ignore_ascii_case(b"NODES"))
}

impl Connection for MockConnection {
    fn send(&self, cmd: Cmd) -> BoxFuture<'_, Result<Reply, TransportError>> {
        async move {
            if !self.is_open() {
                return Err(TransportError::Closed);
            }
            let mut state = self.cluster.state();
            if is_cluster_nodes(&cmd) {
                state.discovery_queries += 1;
                if state.failing_discovery.contains(&self.address) {
                    return Ok(Reply::Error("ERR This instance has cluster support disabled".into()));
                }
                return Ok(Reply::Bulk(state.topology.clone().into()));
            }

            if state.recording {
                state.sent.push((self.address.clone(), cmd));
            }
            Ok(state
                .replies
                .get_mut(&self.address)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Reply::Status("OK".to_string())))
        }
        .boxed()
    }

    fn transaction(&self, cmds: Vec<Cmd>) -> BoxFuture<'_, Result<Reply, TransportError>> {
        async move {
            if !self.is_open() {
                return Err(TransportError::Closed);
            }
            let mut state = self.cluster.state();
            let default = Reply::Array(vec![Reply::Status("OK".to_string()); cmds.len()]);
            if state.recording {
                state.transactions.push((self.address.clone(), cmds));
            }
            Ok(state
                .replies
                .get_mut(&self.address)
                .and_then(VecDeque::pop_front)
                .unwrap_or(default))
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.open.store(false, Ordering::Release);
        async {}.boxed()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
