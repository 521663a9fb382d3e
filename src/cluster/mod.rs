//! Redis Cluster routing.
//!
//! - **Slot hashing**: CRC16 of the key (or its `{hash tag}`) modulo 16384
//! - **Topology discovery**: `CLUSTER NODES`, rebuilt lazily and at most once
//!   per invalidation no matter how many callers are waiting
//! - **Redirect handling**: `MOVED`/`ASK` invalidate the topology and the
//!   command is resubmitted
//! - **Connection pooling**: one shared multiplexed connection per node
//! - **Transactions**: `MULTI`/`EXEC` batches confined to one slot
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> slotmux::Result<()> {
//! use slotmux::ClusterClient;
//!
//! // Connect to Redis Cluster (comma-separated seed nodes)
//! let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001").await?;
//!
//! // Commands are automatically routed to correct node
//! client.set("key", "value").await?;
//! let value = client.get("key").await?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod client;
mod dispatch;
mod node;
mod pool;
mod slot;
mod topology;

pub use batch::BatchBuilder;
pub use client::ClusterClient;
pub use dispatch::CommandDispatcher;
pub use node::{NodeAddress, NodeSet};
pub use pool::ConnectionPool;
pub use slot::{key_slot, same_slot, SLOT_COUNT};
pub use topology::{parse_cluster_nodes, ParseError, ParsedTopology, SlotTable, TopologyCache};
