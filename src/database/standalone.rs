//! Single-node database: a fixed set of numbered [`Db`]s plus optional AOF.

use super::{panic_message, Database, Db};
use crate::aof::{load_aof, AofError, AofHandler};
use crate::commands::{command_name, CommandTable};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::protocol::{CmdLine, Reply};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};

/// The database every connection talks to in standalone mode.
///
/// # Example
///
/// ```
/// use ringkv::connection::Connection;
/// use ringkv::database::{Database, StandaloneDatabase};
/// use ringkv::protocol::{cmd_line, Reply};
///
/// # tokio_test::block_on(async {
/// let db = StandaloneDatabase::new(16);
/// let conn = Connection::detached();
/// assert_eq!(db.exec(&conn, cmd_line(["SET", "name", "Ariz"])).await, Reply::ok());
/// assert_eq!(db.exec(&conn, cmd_line(["GET", "name"])).await, Reply::bulk("Ariz"));
/// # });
/// ```
#[derive(Debug)]
pub struct StandaloneDatabase {
    dbs: Vec<Db>,
    commands: Arc<CommandTable>,
    aof: Option<AofHandler>,
}

impl StandaloneDatabase {
    /// Creates `databases` empty in-memory databases without persistence.
    pub fn new(databases: usize) -> Self {
        Self::with_commands(databases, CommandTable::with_builtin_commands())
    }

    /// Like [`StandaloneDatabase::new`] with a custom command table.
    pub fn with_commands(databases: usize, commands: CommandTable) -> Self {
        let commands = Arc::new(commands);
        let dbs = (0..databases.max(1))
            .map(|index| Db::with_commands(index, Arc::clone(&commands)))
            .collect();
        Self {
            dbs,
            commands,
            aof: None,
        }
    }

    /// Creates the databases described by `config`.
    ///
    /// With `appendonly` on, the existing AOF is replayed first and the writer
    /// is attached afterwards, so replayed commands are not appended again.
    pub async fn open(config: &ServerConfig) -> Result<Self, AofError> {
        let mut database = Self::new(config.databases);

        if config.appendonly {
            let path = config.aof_path();
            let replayed = load_aof(&database, path).await?;

            let aof = AofHandler::open_at(path, replayed.db_index).await?;
            for db in &mut database.dbs {
                db.attach_aof(aof.handle());
            }
            database.aof = Some(aof);
        }

        info!(
            databases = database.dbs.len(),
            appendonly = database.aof.is_some(),
            "Database ready"
        );
        Ok(database)
    }

    pub fn commands(&self) -> &Arc<CommandTable> {
        &self.commands
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    pub fn db(&self, index: usize) -> Option<&Db> {
        self.dbs.get(index)
    }

    /// SELECT index
    fn select(&self, conn: &Connection, args: &[Bytes]) -> Reply {
        let [index] = args else {
            return Reply::arg_num_error("select");
        };
        let index = match std::str::from_utf8(index)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
        {
            Some(index) => index,
            None => return Reply::error("ERR invalid DB index"),
        };
        if index < 0 || index as usize >= self.dbs.len() {
            return Reply::error("ERR DB index out of range");
        }
        conn.select_db(index as usize);
        Reply::ok()
    }

    async fn exec_inner(&self, conn: &Connection, cmd_line: CmdLine) -> Reply {
        let Some(first) = cmd_line.first() else {
            return Reply::error("ERR empty command");
        };
        if command_name(first) == "select" {
            return self.select(conn, &cmd_line[1..]);
        }

        match self.dbs.get(conn.db_index()) {
            Some(db) => db.exec(cmd_line).await,
            None => Reply::error("ERR DB index out of range"),
        }
    }
}

#[async_trait]
impl Database for StandaloneDatabase {
    async fn exec(&self, conn: &Connection, cmd_line: CmdLine) -> Reply {
        match AssertUnwindSafe(self.exec_inner(conn, cmd_line))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply,
            Err(panic) => {
                error!(
                    conn = conn.id(),
                    panic = %panic_message(panic.as_ref()),
                    "Command panicked"
                );
                Reply::unknown_error()
            }
        }
    }

    async fn close(&self) {
        if let Some(aof) = &self.aof {
            aof.close().await;
        }
    }

    fn after_client_close(&self, _conn: &Connection) {}
}
