//! Structured server replies.
//!
//! Redis Cluster signals routing errors as error lines:
//! - `MOVED <slot> <host>:<port>` - the slot has durably moved
//! - `ASK <slot> <host>:<port>` - a single key is mid-migration
//!
//! Error lines are classified once, when the reply is decoded, so routing
//! code matches on [`Reply::Redirect`] instead of inspecting strings.

use bytes::Bytes;

use crate::cluster::NodeAddress;

/// The two redirect flavours sent by cluster nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Permanent reassignment of the slot.
    Moved,
    /// Transient reassignment during slot migration.
    Ask,
}

/// A routing error telling the client which node to talk to instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Permanent or transient.
    pub kind: RedirectKind,
    /// The slot being redirected.
    pub slot: u16,
    /// The node that serves the slot.
    pub target: NodeAddress,
}

/// A reply received from a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Status line (`+OK`).
    Status(String),
    /// Integer (`:1000`).
    Integer(i64),
    /// Binary-safe bulk string.
    Bulk(Bytes),
    /// Null bulk string or null array.
    Nil,
    /// Array of nested replies.
    Array(Vec<Reply>),
    /// Error line that is not a redirect.
    Error(String),
    /// MOVED or ASK redirect.
    Redirect(Redirect),
}

impl Reply {
    /// Classifies an error line received from the server.
    ///
    /// Malformed redirect lines are kept as plain errors.
    pub fn from_error_line(line: &str) -> Self {
        let line = line.trim();
        let kind = if let Some(rest) = line.strip_prefix("MOVED ") {
            Some((RedirectKind::Moved, rest))
        } else {
            line.strip_prefix("ASK ").map(|rest| (RedirectKind::Ask, rest))
        };

        if let Some((kind, rest)) = kind {
            if let Some((slot, target)) = parse_redirect(rest) {
                return Reply::Redirect(Redirect { kind, slot, target });
            }
        }

        Reply::Error(line.to_string())
    }

    /// Returns the bytes of a bulk or status reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(b) => Some(b),
            Reply::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

/// Parses redirect arguments: `<slot> <host>:<port>`.
fn parse_redirect(args: &str) -> Option<(u16, NodeAddress)> {
    let mut parts = args.split_whitespace();
    let slot: u16 = parts.next()?.parse().ok()?;
    let target: NodeAddress = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    Some((slot, target))
}
