//! Single-slot transactions.
//!
//! Redis Cluster only runs `MULTI`/`EXEC` on one node, so every keyed
//! command in a batch must hash to the same slot. The first keyed command
//! fixes the slot; keyless commands ride along. A batch that ever staged a
//! conflicting key stays invalid and fails on commit without touching the
//! network.

use std::fmt;

use tracing::debug;

use super::dispatch::CommandDispatcher;
use super::slot::key_slot;
use crate::core::command::Cmd;
use crate::core::{Connection, Connector};
use crate::error::CommitError;
use crate::proto::reply::Reply;

/// Stages commands for one atomic transaction.
///
/// # Examples
///
/// ```no_run
/// use slotmux::{ClusterClient, Cmd};
///
/// # async fn example(client: ClusterClient) -> slotmux::Result<()> {
/// let reply = client
///     .multi()
///     .stage(Cmd::new("INCR").arg("{user:1}:visits"))
///     .stage(Cmd::new("SET").arg("{user:1}:seen").arg("now"))
///     .commit()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[must_use = "a batch does nothing until committed"]
pub struct BatchBuilder<'a, C: Connector> {
    dispatcher: &'a CommandDispatcher<C>,
    commands: Vec<Cmd>,
    slot: Option<u16>,
    conflict: Option<u16>,
}

impl<'a, C: Connector> BatchBuilder<'a, C> {
    pub(crate) fn new(dispatcher: &'a CommandDispatcher<C>) -> Self {
        Self {
            dispatcher,
            commands: Vec::new(),
            slot: None,
            conflict: None,
        }
    }

    /// Appends a command.
    pub fn stage(mut self, cmd: Cmd) -> Self {
        if let Some(key) = cmd.routing_key() {
            let slot = key_slot(key);
            match self.slot {
                None => self.slot = Some(slot),
                Some(first) if first != slot && self.conflict.is_none() => {
                    debug!(first, conflicting = slot, "batch spans multiple slots");
                    self.conflict = Some(slot);
                }
                Some(_) => {}
            }
        }
        self.commands.push(cmd);
        self
    }

    /// Slot fixed by the first keyed command.
    pub fn slot(&self) -> Option<u16> {
        self.slot
    }

    /// Returns false once commands for different slots were staged.
    pub fn is_valid(&self) -> bool {
        self.conflict.is_none()
    }

    /// Number of staged commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Runs the staged commands as one transaction on the slot's node.
    ///
    /// An empty batch returns an empty array without any I/O.
    ///
    /// # Errors
    ///
    /// - [`CommitError::CrossSlot`] if keys hash to different slots
    /// - [`CommitError::Aborted`] if the server discarded the transaction
    /// - [`CommitError::Server`] if the server rejected it
    /// - [`CommitError::Dispatch`] if routing failed
    pub async fn commit(self) -> Result<Reply, CommitError> {
        if let (Some(first), Some(conflicting)) = (self.slot, self.conflict) {
            return Err(CommitError::CrossSlot { first, conflicting });
        }
        if self.commands.is_empty() {
            return Ok(Reply::Array(Vec::new()));
        }

        let commands = &self.commands;
        let reply = self
            .dispatcher
            .execute(self.slot, |conn| {
                let commands = commands.clone();
                async move { conn.transaction(commands).await }
            })
            .await?;

        match reply {
            Reply::Nil => Err(CommitError::Aborted),
            Reply::Error(message) => Err(CommitError::Server { message }),
            reply => Ok(reply),
        }
    }
}

impl<C: Connector> fmt::Debug for BatchBuilder<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchBuilder")
            .field("commands", &self.commands)
            .field("slot", &self.slot)
            .field("conflict", &self.conflict)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::ClusterConfig;
    use crate::core::command;
    use crate::proto::reply::{Redirect, RedirectKind};
    use crate::testing::MockCluster;

    const A: &str = "10.0.0.1:7000";
    const B: &str = "10.0.0.2:7000";

    fn dispatcher(mock: &MockCluster) -> CommandDispatcher<MockCluster> {
        CommandDispatcher::new(mock.clone(), vec![A.parse().unwrap()], &ClusterConfig::default())
    }

    #[test]
    fn test_stage_tracks_slot() {
        let mock = MockCluster::new();
        let dispatcher = dispatcher(&mock);

        let batch = BatchBuilder::new(&dispatcher)
            .stage(Cmd::new("PING"))
            .stage(command::set("{user}:a", "1"))
            .stage(command::get("{user}:b"));
        assert_eq!(batch.slot(), Some(key_slot("user")));
        assert!(batch.is_valid());
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_conflict_is_sticky() {
        let mock = MockCluster::new();
        let dispatcher = dispatcher(&mock);

        let batch = BatchBuilder::new(&dispatcher)
            .stage(command::get("foo"))
            .stage(command::get("bar"))
            .stage(command::get("foo"));
        assert!(!batch.is_valid());
        assert_eq!(batch.slot(), Some(key_slot("foo")));
    }

    #[tokio::test]
    async fn test_commit_same_slot() {
        let mock = MockCluster::with_topology(&[(A, "0-8191"), (B, "8192-16383")]);
        let dispatcher = dispatcher(&mock);

        // {foo} hashes to 12182, owned by B.
        let reply = BatchBuilder::new(&dispatcher)
            .stage(command::set("{foo}1", "x"))
            .stage(command::get("{foo}2"))
            .commit()
            .await
            .unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![Reply::Status("OK".into()), Reply::Status("OK".into())])
        );

        let transactions = mock.transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].0, B);
        assert_eq!(transactions[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_cross_slot_fails_without_io() {
        let mock = MockCluster::with_topology(&[(A, "0-16383")]);
        let dispatcher = dispatcher(&mock);

        let err = BatchBuilder::new(&dispatcher)
            .stage(command::set("foo", "1"))
            .stage(command::set("bar", "2"))
            .commit()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::CrossSlot { first: 12182, conflicting: 5061 }
        ));
        assert_eq!(mock.discovery_count(), 0);
        assert!(mock.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mock = MockCluster::with_topology(&[(A, "0-16383")]);
        let dispatcher = dispatcher(&mock);

        let reply = BatchBuilder::new(&dispatcher).commit().await.unwrap();
        assert_eq!(reply, Reply::Array(Vec::new()));
        assert_eq!(mock.discovery_count(), 0);
    }

    #[tokio::test]
    async fn test_aborted_and_rejected() {
        let mock = MockCluster::with_topology(&[(A, "0-16383")]);
        mock.push_reply(A, Reply::Nil);
        mock.push_reply(A, Reply::Error("EXECABORT Transaction discarded".into()));
        let dispatcher = dispatcher(&mock);

        let aborted = BatchBuilder::new(&dispatcher)
            .stage(command::get("foo"))
            .commit()
            .await;
        assert!(matches!(aborted, Err(CommitError::Aborted)));

        let rejected = BatchBuilder::new(&dispatcher)
            .stage(command::get("foo"))
            .commit()
            .await;
        assert!(matches!(rejected, Err(CommitError::Server { .. })));
    }

    #[tokio::test]
    async fn test_redirect_retries_whole_batch() {
        let mock = MockCluster::with_topology(&[(A, "0-16383")]);
        let dispatcher = dispatcher(&mock);
        dispatcher.topology().ensure_ready(dispatcher.pool()).await.unwrap();

        mock.set_masters(&[(A, "0-12181"), (B, "12182-16383")]);
        mock.push_reply(
            A,
            Reply::Redirect(Redirect {
                kind: RedirectKind::Moved,
                slot: 12182,
                target: B.parse().unwrap(),
            }),
        );

        BatchBuilder::new(&dispatcher)
            .stage(command::set("{foo}1", "x"))
            .commit()
            .await
            .unwrap();

        let nodes: Vec<_> = mock.transactions().into_iter().map(|(to, _)| to).collect();
        assert_eq!(nodes, vec![A.to_string(), B.to_string()]);
    }
}
