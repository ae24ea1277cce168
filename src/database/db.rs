//! A single logical database.

use crate::aof::AofHandle;
use crate::commands::{command_name, CommandTable};
use crate::protocol::{CmdLine, Reply};
use crate::storage::Dict;
use std::sync::Arc;
use tracing::trace;

/// One numbered keyspace plus the command table used to operate on it.
///
/// A `Db` with an attached [`AofHandle`] appends every successful write
/// command, tagged with its own index.
#[derive(Debug)]
pub struct Db {
    index: usize,
    data: Dict,
    aof: Option<AofHandle>,
    commands: Arc<CommandTable>,
}

impl Db {
    /// Creates an empty database with the built-in commands.
    pub fn new(index: usize) -> Self {
        Self::with_commands(index, Arc::new(CommandTable::with_builtin_commands()))
    }

    pub fn with_commands(index: usize, commands: Arc<CommandTable>) -> Self {
        Self {
            index,
            data: Dict::new(),
            aof: None,
            commands,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> &Dict {
        &self.data
    }

    /// Starts appending write commands through `aof`.
    pub fn attach_aof(&mut self, aof: AofHandle) {
        self.aof = Some(aof);
    }

    /// Executes one command line against this database.
    ///
    /// # Returns
    ///
    /// - `ERR unknown command '<name>'` if the command is not registered
    /// - `ERR wrong number of arguments for '<name>' command` on an arity mismatch
    /// - Otherwise the command's own reply
    pub async fn exec(&self, cmd_line: CmdLine) -> Reply {
        let Some(first) = cmd_line.first() else {
            return Reply::error("ERR empty command");
        };
        let name = command_name(first);

        let Some(spec) = self.commands.get(&name) else {
            return Reply::error(format!("ERR unknown command '{}'", name));
        };
        if !spec.arity.accepts(cmd_line.len()) {
            return Reply::arg_num_error(&name);
        }

        trace!(db = self.index, cmd = %name, "Executing command");
        let reply = (spec.handler)(self, &cmd_line[1..]);

        if spec.flags.is_write() && !reply.is_error() {
            if let Some(aof) = &self.aof {
                aof.add(self.index, cmd_line).await;
            }
        }
        reply
    }
}
