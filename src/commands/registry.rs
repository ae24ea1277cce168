//! Command Registry
//!
//! The [`CommandTable`] maps lowercase command names to a [`CommandSpec`]: the
//! handler function plus the metadata the database layer needs before calling
//! it (arity and whether the command mutates the keyspace).
//!
//! The table is an explicit value built once at startup and shared behind an
//! `Arc`; there is no global registration.

use crate::database::Db;
use crate::protocol::Reply;
use bytes::Bytes;
use std::collections::HashMap;

/// Signature of a command implementation.
///
/// `args` excludes the command name.
pub type ExecFn = fn(&Db, &[Bytes]) -> Reply;

/// Number of tokens a command accepts, counting the command name itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many tokens.
    Exact(usize),
    /// At least this many tokens.
    AtLeast(usize),
}

impl Arity {
    /// Converts a Redis-style arity, where a negative value `-n` means "at least `n`".
    ///
    /// # Example
    /// ```
    /// use ringkv::commands::Arity;
    /// assert_eq!(Arity::from_redis(3), Arity::Exact(3));
    /// assert_eq!(Arity::from_redis(-2), Arity::AtLeast(2));
    /// ```
    pub fn from_redis(arity: i32) -> Self {
        if arity >= 0 {
            Arity::Exact(arity as usize)
        } else {
            Arity::AtLeast(arity.unsigned_abs() as usize)
        }
    }

    /// Returns true if a command line of `tokens` tokens is acceptable.
    pub fn accepts(&self, tokens: usize) -> bool {
        match *self {
            Arity::Exact(n) => tokens == n,
            Arity::AtLeast(n) => tokens >= n,
        }
    }
}

/// Behavioural flags of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags(u8);

impl CommandFlags {
    pub const READONLY: CommandFlags = CommandFlags(0);
    /// Mutates the keyspace; successful calls are appended to the AOF.
    pub const WRITE: CommandFlags = CommandFlags(1);

    pub fn contains(self, other: CommandFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_write(self) -> bool {
        self.contains(CommandFlags::WRITE)
    }
}

/// Metadata and callback for one command table entry.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Lowercase command name.
    pub name: &'static str,
    pub arity: Arity,
    pub flags: CommandFlags,
    pub handler: ExecFn,
}

/// Registry of every command the keyspace understands.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: HashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    /// Builds an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table preloaded with every built-in command.
    pub fn with_builtin_commands() -> Self {
        let mut table = Self::new();
        super::connection::register(&mut table);
        super::string::register(&mut table);
        super::keys::register(&mut table);
        table
    }

    /// Adds a command, replacing any previous entry with the same name.
    pub fn register(&mut self, spec: CommandSpec) {
        debug_assert_eq!(spec.name, spec.name.to_ascii_lowercase());
        self.entries.insert(spec.name, spec);
    }

    /// Looks a command up by its lowercase name.
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lowercases a command name token.
pub fn command_name(token: &[u8]) -> String {
    String::from_utf8_lossy(token).to_ascii_lowercase()
}
