//! # Slotmux
//!
//! Client-side slot router for Redis Cluster, built on multiplexed
//! connections.
//!
//! Every command is sent to the node owning its key's hash slot. The slot
//! table is discovered lazily, refreshed when a node answers with a
//! redirect, and shared by all clones of the client.
//!
//! ## Features
//!
//! - `serde` - Serialize/deserialize configuration types
//! - `test-utils` - In-memory [`MockCluster`](testing::MockCluster) transport
//!
//! ## Example
//!
//! ```no_run
//! use slotmux::{ClusterBuilder, Cmd};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClusterBuilder::new()
//!         .seeds("127.0.0.1:7000,127.0.0.1:7001")
//!         .connect()
//!         .await?;
//!
//!     client.set("{user:1}:name", "ada").await?;
//!     let reply = client
//!         .multi()
//!         .stage(Cmd::new("INCR").arg("{user:1}:logins"))
//!         .stage(Cmd::new("GET").arg("{user:1}:name"))
//!         .commit()
//!         .await?;
//!     println!("{:?}", reply);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod core;
pub mod error;
pub mod proto;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::cluster::{key_slot, same_slot, BatchBuilder, ClusterClient, NodeAddress, SLOT_COUNT};
pub use crate::core::builder::{ClusterBuilder, ClusterConfig, NodePruning};
pub use crate::core::command::Cmd;
pub use crate::core::connection::{TcpConnection, TcpConnector};
pub use crate::core::{Connection, Connector};
pub use crate::error::{
    CommitError, ConnectError, DiscoveryError, DispatchError, Error, Result, TransportError,
};
pub use crate::proto::{Redirect, RedirectKind, Reply};
