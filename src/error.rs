//! Error types.
//!
//! Each layer of the router has its own error enum so callers can tell a
//! refused connection apart from an unreachable cluster or a rejected
//! transaction. [`Error`] wraps all of them for the high-level client.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::cluster::NodeAddress;

/// Result type alias for slotmux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure talking to a single node over an established connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// An IO error occurred.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// The peer sent bytes that are not valid RESP.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The connection was closed before a reply arrived.
    #[error("connection closed")]
    Closed,
}

/// Failure establishing a connection to a node.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The connection attempt failed (refused, unreachable, reset).
    #[error("failed to connect to {address}: {source}")]
    Io {
        /// Node that was dialed.
        address: NodeAddress,
        /// The underlying IO error.
        source: io::Error,
    },

    /// The node did not become ready within the configured timeout.
    #[error("timed out after {timeout:?} connecting to {address}")]
    Timeout {
        /// Node that was dialed.
        address: NodeAddress,
        /// The configured connect timeout.
        timeout: Duration,
    },

    /// The pool was terminated and hands out no more connections.
    #[error("connection pool terminated")]
    Terminated,
}

/// No candidate node could serve a topology query.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// Every known node was tried and none returned a usable topology.
    #[error("could not connect to cluster: {attempted} candidate node(s) failed")]
    Unreachable {
        /// Number of candidates tried.
        attempted: usize,
    },

    /// There are no known nodes to query.
    #[error("could not connect to cluster: no known nodes")]
    NoCandidates,
}

/// Failure dispatching a single command.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// Topology discovery failed before the command could be routed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// No connection could be obtained, including the fallback node.
    #[error("no cluster node available: {source}")]
    Unavailable {
        /// The last connection error.
        #[source]
        source: ConnectError,
    },

    /// The connection failed while the command was in flight.
    #[error("transport error on {address}: {source}")]
    Transport {
        /// Node the command was sent to.
        address: NodeAddress,
        /// The underlying transport error.
        #[source]
        source: TransportError,
    },

    /// The server answered with an error that is not a redirect.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// The command kept being redirected.
    #[error("gave up after {attempts} redirects")]
    TooManyRedirects {
        /// Number of redirects followed.
        attempts: usize,
    },
}

/// Failure committing a staged batch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommitError {
    /// Staged commands hash to different slots.
    #[error("CROSSSLOT batch commands must operate on the same slot (slot {first} vs {conflicting})")]
    CrossSlot {
        /// Slot fixed by the first keyed command.
        first: u16,
        /// First slot that differed.
        conflicting: u16,
    },

    /// The server discarded the transaction (EXEC returned nil).
    #[error("transaction aborted")]
    Aborted,

    /// The server rejected the transaction.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Routing the batch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<DiscoveryError> for CommitError {
    fn from(err: DiscoveryError) -> Self {
        CommitError::Dispatch(DispatchError::Discovery(err))
    }
}

/// Top-level error returned by [`ClusterClient`](crate::ClusterClient).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// A reply had an unexpected shape for the typed helper that issued it.
    #[error("unexpected reply: {message}")]
    UnexpectedReply {
        /// Description of the mismatch.
        message: String,
    },

    /// Connection error.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Discovery error.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Dispatch error.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Commit error.
    #[error(transparent)]
    Commit(#[from] CommitError),
}
