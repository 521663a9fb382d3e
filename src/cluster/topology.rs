//! Cluster topology: the slot table, its parser and the cache around it.
//!
//! Topology is discovered with `CLUSTER NODES`, whose reply has one line
//! per node:
//!
//! ```text
//! <id> <ip:port@cport[,hostname]> <flags> <master> <ping-sent> <pong-recv> <config-epoch> <link-state> <slot> <slot> ...
//! ```
//!
//! Only the address and the slot tokens are consumed. A slot token is a
//! single slot (`42`), an inclusive range (`0-5460`) or a migration marker
//! (`[93->-<node-id>]`), which is skipped.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::node::{NodeAddress, NodeSet};
use super::pool::ConnectionPool;
use super::slot::SLOT_COUNT;
use crate::core::builder::NodePruning;
use crate::core::command::cluster_nodes;
use crate::core::{Connection, Connector};
use crate::error::{ConnectError, DiscoveryError, TransportError};
use crate::proto::reply::Reply;

/// Mapping from every slot to its owning node, if any.
///
/// Built wholesale by discovery and never mutated once published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    owners: Vec<NodeAddress>,
    slots: Vec<Option<u16>>,
}

impl SlotTable {
    /// Creates a table with every slot unassigned.
    pub fn new() -> Self {
        Self {
            owners: Vec::new(),
            slots: vec![None; SLOT_COUNT as usize],
        }
    }

    /// Assigns an inclusive range of slots to `node`, overwriting earlier owners.
    ///
    /// Slots outside `0..SLOT_COUNT` are ignored.
    pub fn assign(&mut self, range: RangeInclusive<u16>, node: &NodeAddress) {
        let index = match self.owners.iter().position(|owner| owner == node) {
            Some(index) => index,
            None => {
                self.owners.push(node.clone());
                self.owners.len() - 1
            }
        };
        let end = (*range.end()).min(SLOT_COUNT - 1);
        for slot in *range.start()..=end {
            self.slots[slot as usize] = Some(index as u16);
        }
    }

    /// Returns the owner of `slot`.
    pub fn get(&self, slot: u16) -> Option<&NodeAddress> {
        let index = (*self.slots.get(slot as usize)?)?;
        self.owners.get(index as usize)
    }

    /// Number of slots with an owner.
    pub fn assigned_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if every slot has an owner.
    pub fn is_fully_covered(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Nodes that own at least one slot, in order of first assignment.
    pub fn owners(&self) -> &[NodeAddress] {
        &self.owners
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A malformed `CLUSTER NODES` reply.
#[derive(Debug, Error)]
#[error("malformed CLUSTER NODES reply at line {line}: {message}")]
pub struct ParseError {
    /// One-based line number.
    pub line: usize,
    /// What was wrong.
    pub message: String,
}

/// Result of parsing one `CLUSTER NODES` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopology {
    /// Every node listed, deduplicated, in reply order.
    pub nodes: NodeSet,
    /// Slot ownership.
    pub table: SlotTable,
}

/// Parses a `CLUSTER NODES` reply.
///
/// `dialed` replaces addresses the node does not know yet (`:0`).
///
/// # Examples
///
/// ```
/// use slotmux::cluster::{parse_cluster_nodes, NodeAddress};
///
/// let reply = "abc123 10.0.0.1:7000 master - 0 0 1 connected 0-5460\n";
/// let parsed = parse_cluster_nodes(reply, &NodeAddress::new("10.0.0.1", 7000)).unwrap();
/// assert_eq!(parsed.table.get(5460), Some(&NodeAddress::new("10.0.0.1", 7000)));
/// assert_eq!(parsed.table.get(5461), None);
/// ```
pub fn parse_cluster_nodes(reply: &str, dialed: &NodeAddress) -> Result<ParsedTopology, ParseError> {
    let mut nodes = NodeSet::new();
    let mut table = SlotTable::new();

    for (index, line) in reply.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let err = |message: String| ParseError {
            line: index + 1,
            message,
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(err(format!("expected at least 8 fields, got {}", fields.len())));
        }

        let address = parse_node_address(fields[1], dialed).map_err(err)?;
        nodes.insert(address.clone());

        for token in &fields[8..] {
            if token.starts_with('[') {
                continue;
            }
            let range = parse_slot_range(token).map_err(err)?;
            table.assign(range, &address);
        }
    }

    if nodes.is_empty() {
        return Err(ParseError {
            line: 0,
            message: "reply lists no nodes".to_string(),
        });
    }

    Ok(ParsedTopology { nodes, table })
}

/// Parses the address field, dropping the `@cport` and `,hostname` suffixes.
fn parse_node_address(field: &str, dialed: &NodeAddress) -> Result<NodeAddress, String> {
    let addr = field
        .split(['@', ','])
        .next()
        .unwrap_or_default();

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid node address '{}'", field))?;

    // The node has not learned its own IP yet: it is the one we dialed.
    if host.is_empty() {
        return Ok(dialed.clone());
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid port in node address '{}'", field))?;
    Ok(NodeAddress::new(host, port))
}

fn parse_slot_range(token: &str) -> Result<RangeInclusive<u16>, String> {
    let parse = |s: &str| -> Result<u16, String> {
        match s.parse::<u16>() {
            Ok(slot) if slot < SLOT_COUNT => Ok(slot),
            _ => Err(format!("invalid slot '{}'", s)),
        }
    };

    let (first, last) = match token.split_once('-') {
        Some((first, last)) => (parse(first)?, parse(last)?),
        None => {
            let slot = parse(token)?;
            (slot, slot)
        }
    };

    if first > last {
        return Err(format!("inverted slot range '{}'", token));
    }
    Ok(first..=last)
}

#[derive(Debug, Error)]
enum QueryError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected reply: {0}")]
    Reply(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug)]
struct TopologyState {
    table: Arc<SlotTable>,
    nodes: NodeSet,
}

/// Cached slot ownership plus the set of known nodes.
///
/// Rebuilds are serialized: a caller that waited for another rebuild to
/// finish reuses its result instead of querying the cluster again.
#[derive(Debug)]
pub struct TopologyCache {
    state: RwLock<TopologyState>,
    ready: AtomicBool,
    generation: AtomicU64,
    cursor: AtomicUsize,
    rebuild_lock: Mutex<()>,
    pruning: NodePruning,
}

impl TopologyCache {
    /// Creates a cache that knows only the seed nodes.
    pub fn new(seeds: impl IntoIterator<Item = NodeAddress>, pruning: NodePruning) -> Self {
        Self {
            state: RwLock::new(TopologyState {
                table: Arc::new(SlotTable::new()),
                nodes: seeds.into_iter().collect(),
            }),
            ready: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
            rebuild_lock: Mutex::new(()),
            pruning,
        }
    }

    /// Returns true once a rebuild succeeded and no invalidation followed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Marks the cache stale; the next [`ensure_ready`](Self::ensure_ready) rebuilds it.
    pub fn invalidate(&self) {
        self.ready.store(false, Ordering::Release);
    }

    /// Number of completed rebuilds.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Rebuilds the cache if it is not ready.
    pub async fn ensure_ready<C: Connector>(&self, pool: &ConnectionPool<C>) -> Result<(), DiscoveryError> {
        if self.is_ready() {
            return Ok(());
        }
        self.rebuild(pool).await
    }

    /// Queries known nodes in round-robin order until one returns a usable
    /// topology, then publishes it.
    ///
    /// # Errors
    ///
    /// Fails once every known node has been tried.
    #[instrument(skip_all, level = "debug")]
    pub async fn rebuild<C: Connector>(&self, pool: &ConnectionPool<C>) -> Result<(), DiscoveryError> {
        let observed = self.generation();
        let _guard = self.rebuild_lock.lock().await;
        if self.is_ready() && self.generation() != observed {
            debug!("topology refreshed by a concurrent caller");
            return Ok(());
        }

        let candidates = {
            let state = self.state.read().await;
            state.nodes.rotation(self.cursor.load(Ordering::Relaxed))
        };
        if candidates.is_empty() {
            return Err(DiscoveryError::NoCandidates);
        }

        for candidate in &candidates {
            self.cursor.fetch_add(1, Ordering::Relaxed);
            match query_topology(pool, candidate).await {
                Ok(parsed) => {
                    self.publish(parsed).await;
                    return Ok(());
                }
                Err(e) => warn!(address = %candidate, error = %e, "topology query failed"),
            }
        }

        Err(DiscoveryError::Unreachable {
            attempted: candidates.len(),
        })
    }

    async fn publish(&self, parsed: ParsedTopology) {
        let mut state = self.state.write().await;
        match self.pruning {
            NodePruning::Retain => {
                for node in parsed.nodes.iter() {
                    state.nodes.insert(node.clone());
                }
            }
            NodePruning::PruneAbsent => state.nodes = parsed.nodes,
        }
        info!(
            nodes = state.nodes.len(),
            assigned_slots = parsed.table.assigned_count(),
            "topology refreshed"
        );
        state.table = Arc::new(parsed.table);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.ready.store(true, Ordering::Release);
    }

    /// Returns the node owning `slot`, if assigned.
    pub async fn resolve(&self, slot: u16) -> Option<NodeAddress> {
        self.state.read().await.table.get(slot).cloned()
    }

    /// Picks a known node in round-robin order, skipping `exclude`.
    pub async fn arbitrary_node(&self, exclude: Option<&NodeAddress>) -> Option<NodeAddress> {
        let state = self.state.read().await;
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        match exclude {
            None => state.nodes.pick(start).cloned(),
            Some(exclude) => state
                .nodes
                .rotation(start)
                .into_iter()
                .find(|node| node != exclude),
        }
    }

    /// Snapshot of the current slot table.
    pub async fn table(&self) -> Arc<SlotTable> {
        self.state.read().await.table.clone()
    }

    /// Snapshot of the known nodes.
    pub async fn nodes(&self) -> NodeSet {
        self.state.read().await.nodes.clone()
    }
}

async fn query_topology<C: Connector>(
    pool: &ConnectionPool<C>,
    address: &NodeAddress,
) -> Result<ParsedTopology, QueryError> {
    let conn = pool.open_unpooled(address).await?;
    let reply = conn.send(cluster_nodes()).await;
    conn.close().await;

    let text = match reply? {
        Reply::Bulk(data) => String::from_utf8_lossy(&data).into_owned(),
        Reply::Status(text) => text,
        other => return Err(QueryError::Reply(format!("{:?}", other))),
    };
    Ok(parse_cluster_nodes(&text, address)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cluster_nodes_line, MockCluster};
    use std::time::Duration;

    fn dialed() -> NodeAddress {
        NodeAddress::new("192.168.0.9", 7009)
    }

    fn pool(mock: &MockCluster) -> ConnectionPool<MockCluster> {
        ConnectionPool::new(mock.clone(), Duration::from_secs(1))
    }

    #[test]
    fn test_parse_example_line() {
        let parsed = parse_cluster_nodes(
            "abc123 10.0.0.1:7000 master - 0 0 1 connected 0-5460",
            &dialed(),
        )
        .unwrap();
        let owner = NodeAddress::new("10.0.0.1", 7000);

        for slot in [0, 1, 2730, 5460] {
            assert_eq!(parsed.table.get(slot), Some(&owner));
        }
        assert_eq!(parsed.table.get(5461), None);
        assert_eq!(parsed.table.assigned_count(), 5461);
        assert!(parsed.nodes.contains(&owner));
    }

    #[test]
    fn test_parse_three_masters_full_coverage() {
        let reply = [
            cluster_nodes_line("a", "127.0.0.1:7000", "0-5460"),
            cluster_nodes_line("b", "127.0.0.1:7001", "5461-10922"),
            cluster_nodes_line("c", "127.0.0.1:7002", "10923-16383"),
            "d 127.0.0.1:7003@17003 slave a 0 0 1 connected".to_string(),
        ]
        .join("\n");

        let parsed = parse_cluster_nodes(&reply, &dialed()).unwrap();
        assert!(parsed.table.is_fully_covered());
        assert_eq!(parsed.nodes.len(), 4);
        assert_eq!(parsed.table.owners().len(), 3);
        assert_eq!(parsed.table.get(10922).map(|n| n.port()), Some(7001));
        assert_eq!(parsed.table.get(10923).map(|n| n.port()), Some(7002));
    }

    #[test]
    fn test_parse_single_slots_and_migration_markers() {
        let reply = "a 10.0.0.1:7000@17000 myself,master - 0 0 1 connected 5 7-8 [9->-b] [10-<-b]";
        let parsed = parse_cluster_nodes(reply, &dialed()).unwrap();
        assert!(parsed.table.get(5).is_some());
        assert!(parsed.table.get(6).is_none());
        assert!(parsed.table.get(7).is_some());
        assert!(parsed.table.get(8).is_some());
        assert!(parsed.table.get(9).is_none());
        assert!(parsed.table.get(10).is_none());
    }

    #[test]
    fn test_parse_unknown_own_address_uses_dialed() {
        let reply = "a :0 myself,master - 0 0 0 connected 0-100";
        let parsed = parse_cluster_nodes(reply, &dialed()).unwrap();
        assert_eq!(parsed.table.get(100), Some(&dialed()));

        let reply = "a :7000@17000 myself,master - 0 0 0 connected 0-100";
        let parsed = parse_cluster_nodes(reply, &dialed()).unwrap();
        assert_eq!(parsed.table.get(0), Some(&dialed()));
    }

    #[test]
    fn test_parse_hostname_suffix() {
        let reply = "a 10.0.0.1:7000@17000,redis-a.local master - 0 0 1 connected 0";
        let parsed = parse_cluster_nodes(reply, &dialed()).unwrap();
        assert_eq!(parsed.table.get(0), Some(&NodeAddress::new("10.0.0.1", 7000)));
    }

    #[test]
    fn test_parse_overlap_last_seen_wins() {
        let reply = [
            cluster_nodes_line("a", "10.0.0.1:7000", "0-100"),
            cluster_nodes_line("b", "10.0.0.2:7000", "50-60"),
        ]
        .join("\n");
        let parsed = parse_cluster_nodes(&reply, &dialed()).unwrap();
        assert_eq!(parsed.table.get(49).map(|n| n.host()), Some("10.0.0.1"));
        assert_eq!(parsed.table.get(50).map(|n| n.host()), Some("10.0.0.2"));
        assert_eq!(parsed.table.get(60).map(|n| n.host()), Some("10.0.0.2"));
        assert_eq!(parsed.table.get(61).map(|n| n.host()), Some("10.0.0.1"));
    }

    #[test]
    fn test_parse_malformed() {
        let cases = [
            "",
            "a 10.0.0.1:7000 master",
            "a nohost master - 0 0 1 connected 0",
            "a 10.0.0.1:7000 master - 0 0 1 connected x-5",
            "a 10.0.0.1:7000 master - 0 0 1 connected 16384",
            "a 10.0.0.1:7000 master - 0 0 1 connected 10-5",
        ];
        for reply in cases {
            assert!(parse_cluster_nodes(reply, &dialed()).is_err(), "{:?}", reply);
        }
    }

    #[test]
    fn test_slot_table_assign_clamps() {
        let mut table = SlotTable::new();
        table.assign(16380..=u16::MAX, &dialed());
        assert_eq!(table.assigned_count(), 4);
    }

    #[tokio::test]
    async fn test_rebuild_publishes_table() {
        let mock = MockCluster::with_topology(&[
            ("10.0.0.1:7000", "0-8191"),
            ("10.0.0.2:7000", "8192-16383"),
        ]);
        let pool = pool(&mock);
        let cache = TopologyCache::new([NodeAddress::new("10.0.0.1", 7000)], NodePruning::Retain);

        assert!(!cache.is_ready());
        cache.rebuild(&pool).await.unwrap();
        assert!(cache.is_ready());
        assert_eq!(cache.generation(), 1);
        assert_eq!(
            cache.resolve(9000).await,
            Some(NodeAddress::new("10.0.0.2", 7000))
        );
        assert_eq!(cache.nodes().await.len(), 2);
        // Discovery connections are not pooled.
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn test_rebuild_rotates_past_failing_candidates() {
        let mock = MockCluster::with_topology(&[("10.0.0.3:7000", "0-16383")]);
        mock.set_unreachable("10.0.0.1:7000", true);
        mock.fail_discovery("10.0.0.2:7000");
        let pool = pool(&mock);
        let cache = TopologyCache::new(
            [
                NodeAddress::new("10.0.0.1", 7000),
                NodeAddress::new("10.0.0.2", 7000),
                NodeAddress::new("10.0.0.3", 7000),
            ],
            NodePruning::Retain,
        );

        cache.rebuild(&pool).await.unwrap();
        assert_eq!(mock.connect_attempts("10.0.0.1:7000"), 1);
        assert_eq!(mock.discovery_count(), 2);
        assert!(cache.table().await.is_fully_covered());
    }

    #[tokio::test]
    async fn test_rebuild_unreachable_cluster() {
        let mock = MockCluster::with_topology(&[("10.0.0.1:7000", "0-16383")]);
        mock.set_unreachable("10.0.0.1:7000", true);
        mock.set_unreachable("10.0.0.2:7000", true);
        let pool = pool(&mock);
        let cache = TopologyCache::new(
            [NodeAddress::new("10.0.0.1", 7000), NodeAddress::new("10.0.0.2", 7000)],
            NodePruning::Retain,
        );

        let err = cache.rebuild(&pool).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unreachable { attempted: 2 }));
        assert!(!cache.is_ready());

        let empty = TopologyCache::new([], NodePruning::Retain);
        assert!(matches!(
            empty.rebuild(&pool).await,
            Err(DiscoveryError::NoCandidates)
        ));
    }

    #[tokio::test]
    async fn test_pruning_policies() {
        let mock = MockCluster::with_topology(&[("10.0.0.2:7000", "0-16383")]);
        let pool = pool(&mock);
        let seed = NodeAddress::new("10.0.0.1", 7000);

        let retain = TopologyCache::new([seed.clone()], NodePruning::Retain);
        retain.rebuild(&pool).await.unwrap();
        assert!(retain.nodes().await.contains(&seed));
        assert_eq!(retain.nodes().await.len(), 2);

        let prune = TopologyCache::new([seed.clone()], NodePruning::PruneAbsent);
        prune.rebuild(&pool).await.unwrap();
        assert!(!prune.nodes().await.contains(&seed));
        assert_eq!(prune.nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_share_one_query() {
        let mock = MockCluster::with_topology(&[("10.0.0.1:7000", "0-16383")]);
        mock.set_connect_delay(Duration::from_millis(20));
        let pool = pool(&mock);
        let cache = TopologyCache::new([NodeAddress::new("10.0.0.1", 7000)], NodePruning::Retain);

        let (a, b, c) = tokio::join!(
            cache.ensure_ready(&pool),
            cache.ensure_ready(&pool),
            cache.ensure_ready(&pool)
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(mock.discovery_count(), 1);
        assert_eq!(cache.generation(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let mock = MockCluster::with_topology(&[("10.0.0.1:7000", "0-16383")]);
        let pool = pool(&mock);
        let cache = TopologyCache::new([NodeAddress::new("10.0.0.1", 7000)], NodePruning::Retain);

        cache.ensure_ready(&pool).await.unwrap();
        cache.ensure_ready(&pool).await.unwrap();
        assert_eq!(mock.discovery_count(), 1);

        cache.invalidate();
        cache.ensure_ready(&pool).await.unwrap();
        assert_eq!(mock.discovery_count(), 2);
    }

    #[tokio::test]
    async fn test_arbitrary_node_excludes() {
        let a = NodeAddress::new("a", 1);
        let b = NodeAddress::new("b", 1);
        let cache = TopologyCache::new([a.clone(), b.clone()], NodePruning::Retain);

        for _ in 0..4 {
            assert_eq!(cache.arbitrary_node(Some(&a)).await, Some(b.clone()));
        }
        let single = TopologyCache::new([a.clone()], NodePruning::Retain);
        assert_eq!(single.arbitrary_node(Some(&a)).await, None);
        assert_eq!(single.arbitrary_node(None).await, Some(a.clone()));

        // Without exclusion the picks rotate over every node.
        let first = cache.arbitrary_node(None).await.unwrap();
        let second = cache.arbitrary_node(None).await.unwrap();
        assert_ne!(first, second);
        assert!([&a, &b].contains(&&first) && [&a, &b].contains(&&second));
    }
}
