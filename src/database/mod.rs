//! Database Layer
//!
//! Everything a connection can execute commands against implements
//! [`Database`]. Two implementations exist:
//!
//! - [`StandaloneDatabase`]: numbered keyspaces on this node, optional AOF
//! - [`ClusterDatabase`](crate::cluster::ClusterDatabase): routes each command
//!   to the node that owns its key
//!
//! ```text
//!             ┌──────────────────────┐
//!  RespHandler│   Arc<dyn Database>  │
//!  ──────────>│  exec / close / ...  │
//!             └──────────┬───────────┘
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!  StandaloneDatabase           ClusterDatabase
//!   ├─ Db 0 ─ Dict                ├─ NodeMap (ring)
//!   ├─ Db 1 ─ Dict                ├─ PeerPool per peer
//!   └─ AofHandler                 └─ StandaloneDatabase (local)
//! ```

pub mod db;
pub mod standalone;

pub use db::Db;
pub use standalone::StandaloneDatabase;

use crate::cluster::ClusterDatabase;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::protocol::{CmdLine, Reply};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tracing::info;

/// The command execution interface shared by standalone and cluster mode.
#[async_trait]
pub trait Database: Send + Sync {
    /// Executes one command line on behalf of `conn`.
    ///
    /// Always yields exactly one reply. A panic during execution becomes
    /// `-Err unknown`.
    async fn exec(&self, conn: &Connection, cmd_line: CmdLine) -> Reply;

    /// Releases resources. Called once, after every connection is closed.
    async fn close(&self);

    /// Hook run when a client connection goes away.
    fn after_client_close(&self, conn: &Connection);
}

/// Builds the database described by `config`.
///
/// Cluster mode is used when `self` is set and at least one peer is listed.
pub async fn build_database(config: &ServerConfig) -> anyhow::Result<Arc<dyn Database>> {
    let local = StandaloneDatabase::open(config).await?;

    if config.is_cluster() {
        info!(
            self_addr = %config.self_addr,
            peers = ?config.peers,
            "Starting in cluster mode"
        );
        Ok(Arc::new(ClusterDatabase::new(config, local)))
    } else {
        Ok(Arc::new(local))
    }
}

/// Extracts the message from a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
