//! Commands and their routing metadata.
//!
//! Any command can be sent through the router: it is described by a name
//! and an argument list. Where the routing key lives is looked up in a
//! static table keyed by command name, so no per-command code is needed.

use bytes::Bytes;

/// A single command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// One value.
    Single(Bytes),
    /// A sequence of values, flattened on the wire.
    Multi(Vec<Bytes>),
}

impl Arg {
    /// The value used for routing: the value itself, or the first element
    /// of a sequence.
    pub fn first(&self) -> Option<&Bytes> {
        match self {
            Arg::Single(b) => Some(b),
            Arg::Multi(items) => items.first(),
        }
    }
}

/// A command ready to be sent to a node.
///
/// # Example
///
/// ```
/// use slotmux::Cmd;
///
/// let cmd = Cmd::new("SET").arg("key").arg("value");
/// assert_eq!(cmd.routing_key().map(|k| k.as_ref()), Some(&b"key"[..]));
///
/// let exists = Cmd::new("EXISTS").arg_list(["a", "b"]);
/// assert_eq!(exists.routing_key().map(|k| k.as_ref()), Some(&b"a"[..]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    name: String,
    args: Vec<Arg>,
}

impl Cmd {
    /// Creates a new command with the given name.
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(Arg::Single(arg.into()));
        self
    }

    /// Appends a sequence argument to the command.
    #[inline]
    pub fn arg_list<I, T>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.args
            .push(Arg::Multi(items.into_iter().map(Into::into).collect()));
        self
    }

    /// The command name as given.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The arguments, excluding the name.
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Routing metadata for this command.
    pub fn info(&self) -> CommandInfo {
        command_info(&self.name)
    }

    /// Returns the key that decides which slot this command is routed to.
    ///
    /// `None` for administrative commands and for keyed commands that were
    /// built without their key argument.
    pub fn routing_key(&self) -> Option<&Bytes> {
        match self.info().key {
            KeyPosition::None => None,
            KeyPosition::Arg(index) => self.args.get(index).and_then(Arg::first),
        }
    }

    /// Name followed by flattened arguments, as sent on the wire.
    pub fn to_parts(&self) -> Vec<Bytes> {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(Bytes::copy_from_slice(self.name.as_bytes()));
        for arg in &self.args {
            match arg {
                Arg::Single(b) => parts.push(b.clone()),
                Arg::Multi(items) => parts.extend(items.iter().cloned()),
            }
        }
        parts
    }
}

/// Where a command's routing key is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPosition {
    /// Not keyed: sent to an arbitrary node.
    None,
    /// Index into the arguments following the command name.
    Arg(usize),
}

/// Static routing metadata for a command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    /// Upper-case command name.
    pub name: &'static str,
    /// Position of the routing key.
    pub key: KeyPosition,
}

impl CommandInfo {
    /// Returns true if the command carries a routing key.
    pub fn is_keyed(&self) -> bool {
        self.key != KeyPosition::None
    }
}

const fn keyless(name: &'static str) -> CommandInfo {
    CommandInfo {
        name,
        key: KeyPosition::None,
    }
}

const fn keyed_at(name: &'static str, index: usize) -> CommandInfo {
    CommandInfo {
        name,
        key: KeyPosition::Arg(index),
    }
}

/// Commands whose routing differs from the default "first argument is the key".
pub const COMMAND_TABLE: &[CommandInfo] = &[
    keyless("ASKING"),
    keyless("AUTH"),
    keyless("BGREWRITEAOF"),
    keyless("BGSAVE"),
    keyless("CLIENT"),
    keyless("CLUSTER"),
    keyless("COMMAND"),
    keyless("CONFIG"),
    keyless("DBSIZE"),
    keyless("DISCARD"),
    keyless("ECHO"),
    keyless("EXEC"),
    keyless("FLUSHALL"),
    keyless("FLUSHDB"),
    keyless("HELLO"),
    keyless("INFO"),
    keyless("LASTSAVE"),
    keyless("MULTI"),
    keyless("PING"),
    keyless("QUIT"),
    keyless("READONLY"),
    keyless("READWRITE"),
    keyless("REPLICAOF"),
    keyless("ROLE"),
    keyless("SAVE"),
    keyless("SELECT"),
    keyless("SHUTDOWN"),
    keyless("SLAVEOF"),
    keyless("TIME"),
    keyed_at("MEMORY", 1),
    keyed_at("OBJECT", 1),
    keyed_at("XGROUP", 1),
    keyed_at("XINFO", 1),
];

/// Looks up routing metadata, defaulting to a key at the first argument.
pub fn command_info(name: &str) -> CommandInfo {
    COMMAND_TABLE
        .iter()
        .find(|info| info.name.eq_ignore_ascii_case(name))
        .copied()
        .unwrap_or(CommandInfo {
            name: "",
            key: KeyPosition::Arg(0),
        })
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a DEL command.
#[inline]
pub fn del(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("DEL").arg(key)
}

/// Creates an EXISTS command.
#[inline]
pub fn exists(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("EXISTS").arg(key)
}

/// Creates a CLUSTER NODES command, used for topology discovery.
#[inline]
pub fn cluster_nodes() -> Cmd {
    Cmd::new("CLUSTER").arg("NODES")
}

/// Creates a MULTI command.
#[inline]
pub fn multi() -> Cmd {
    Cmd::new("MULTI")
}

/// Creates an EXEC command.
#[inline]
pub fn exec() -> Cmd {
    Cmd::new("EXEC")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_first_argument() {
        let cmd = Cmd::new("HSET").arg("user:1").arg("field").arg("v");
        assert_eq!(cmd.routing_key(), Some(&Bytes::from("user:1")));
    }

    #[test]
    fn test_routing_key_sequence_argument() {
        let cmd = Cmd::new("EXISTS").arg_list(vec!["k1", "k2"]);
        assert_eq!(cmd.routing_key(), Some(&Bytes::from("k1")));

        let empty = Cmd::new("EXISTS").arg_list(Vec::<Bytes>::new());
        assert_eq!(empty.routing_key(), None);
    }

    #[test]
    fn test_administrative_commands_are_keyless() {
        for name in ["info", "MULTI", "Exec", "slaveof", "config", "shutdown", "cluster"] {
            let cmd = Cmd::new(name).arg("whatever");
            assert_eq!(cmd.routing_key(), None, "{} should be keyless", name);
            assert!(!cmd.info().is_keyed());
        }
    }

    #[test]
    fn test_subcommand_key_position() {
        let cmd = Cmd::new("object").arg("ENCODING").arg("mykey");
        assert_eq!(cmd.routing_key(), Some(&Bytes::from("mykey")));
    }

    #[test]
    fn test_missing_key_argument() {
        assert_eq!(Cmd::new("GET").routing_key(), None);
    }

    #[test]
    fn test_to_parts_flattens_sequences() {
        let cmd = Cmd::new("DEL").arg_list(["a", "b"]).arg("c");
        let parts = cmd.to_parts();
        assert_eq!(
            parts,
            vec![
                Bytes::from("DEL"),
                Bytes::from("a"),
                Bytes::from("b"),
                Bytes::from("c")
            ]
        );
    }

    #[test]
    fn test_builders() {
        assert_eq!(cluster_nodes().to_parts(), vec![Bytes::from("CLUSTER"), Bytes::from("NODES")]);
        assert_eq!(set("k", "v").routing_key(), Some(&Bytes::from("k")));
        assert_eq!(multi().routing_key(), None);
    }
}
