//! Connection seam and configuration.
//!
//! The router never speaks to sockets directly. It talks to a
//! [`Connector`], which opens [`Connection`]s to individual nodes; the
//! default implementation is [`TcpConnector`](connection::TcpConnector).
//!
//! ## Modules
//!
//! - [`builder`] - Cluster configuration and builder
//! - [`command`] - Commands and routing metadata
//! - [`connection`] - RESP-over-TCP transport

use std::io;

use futures::future::BoxFuture;

use crate::cluster::NodeAddress;
use crate::error::TransportError;
use crate::proto::reply::Reply;

/// Cluster configuration and builder.
pub mod builder;
/// Command construction and routing metadata.
pub mod command;
/// Default TCP transport.
pub mod connection;

use command::Cmd;

/// An established connection to one cluster node.
///
/// Implementations must allow concurrent use through a shared reference:
/// the pool hands the same handle to every caller routed to that node.
pub trait Connection: Send + Sync + 'static {
    /// Sends one command and waits for its reply.
    ///
    /// Server-side errors and redirects arrive as `Ok` replies; `Err` means
    /// the transport itself failed.
    fn send(&self, cmd: Cmd) -> BoxFuture<'_, Result<Reply, TransportError>>;

    /// Runs `cmds` atomically (MULTI / EXEC) and returns EXEC's reply.
    ///
    /// If any queued command is answered with a redirect, that redirect is
    /// returned instead so the caller can reroute the whole transaction.
    fn transaction(&self, cmds: Vec<Cmd>) -> BoxFuture<'_, Result<Reply, TransportError>>;

    /// Closes the connection. Later sends fail.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// Returns false once the connection is known to be unusable.
    fn is_open(&self) -> bool {
        true
    }
}

/// Opens connections to cluster nodes.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced.
    type Connection: Connection;

    /// Opens a connection. Resolving successfully means the node is ready.
    fn connect<'a>(&'a self, address: &'a NodeAddress)
        -> BoxFuture<'a, io::Result<Self::Connection>>;
}

/// Folds the replies of `MULTI`, the queued commands and `EXEC` into the
/// single reply returned by [`Connection::transaction`].
pub fn fold_transaction(replies: Vec<Reply>) -> Result<Reply, TransportError> {
    if let Some(redirect) = replies
        .iter()
        .find(|reply| matches!(reply, Reply::Redirect(_)))
    {
        return Ok(redirect.clone());
    }

    let mut replies = replies.into_iter();
    match replies.next() {
        Some(err @ Reply::Error(_)) => Ok(err),
        Some(_) => replies.last().ok_or_else(|| TransportError::Protocol {
            message: "missing EXEC reply".to_string(),
        }),
        None => Err(TransportError::Protocol {
            message: "empty transaction reply".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::reply::{Redirect, RedirectKind};

    fn queued() -> Reply {
        Reply::Status("QUEUED".to_string())
    }

    #[test]
    fn test_fold_transaction_returns_exec_reply() {
        let exec = Reply::Array(vec![Reply::Status("OK".into()), Reply::Integer(2)]);
        let replies = vec![Reply::Status("OK".into()), queued(), queued(), exec.clone()];
        assert_eq!(fold_transaction(replies).unwrap(), exec);
    }

    #[test]
    fn test_fold_transaction_prefers_redirect() {
        let redirect = Reply::Redirect(Redirect {
            kind: RedirectKind::Moved,
            slot: 7,
            target: NodeAddress::new("10.0.0.2", 7001),
        });
        let replies = vec![
            Reply::Status("OK".into()),
            redirect.clone(),
            Reply::Error("EXECABORT Transaction discarded".into()),
        ];
        assert_eq!(fold_transaction(replies).unwrap(), redirect);
    }

    #[test]
    fn test_fold_transaction_multi_rejected() {
        let replies = vec![Reply::Error("ERR MULTI calls can not be nested".into())];
        assert!(matches!(fold_transaction(replies), Ok(Reply::Error(_))));
        assert!(fold_transaction(Vec::new()).is_err());
        assert!(fold_transaction(vec![Reply::Status("OK".into())]).is_err());
    }
}
