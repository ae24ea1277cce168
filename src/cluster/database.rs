//! Cluster-mode database.
//!
//! Every node runs a [`ClusterDatabase`] over the same static node list, so
//! every node computes the same key owner. A command is either executed on
//! the local store, relayed to the owning node, or broadcast to all nodes:
//!
//! ```text
//!   client ──> node A ──route_for──┬── Local ─────> A.local
//!                                  ├── Forward ───> owner(key) ──> A.local | pool(B)
//!                                  ├── SameNode ──> owner(k1) == owner(k2) ?
//!                                  └── Broadcast ─> A.local + pool(B) + ... ─> merge
//! ```
//!
//! A relay to a peer first sends `SELECT <n>` with the caller's database
//! index on the borrowed connection, then the command itself.

use super::client::PeerError;
use super::consistent_hash::NodeMap;
use super::pool::PeerPool;
use super::router::{merge_replies, route_for, Route, PEER_EXEC};
use crate::commands::command_name;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::database::{panic_message, Database, StandaloneDatabase};
use crate::protocol::{cmd_line, CmdLine, Reply};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

/// Routes commands across a fixed set of nodes.
#[derive(Debug)]
pub struct ClusterDatabase {
    self_addr: String,
    /// Peers in configuration order, then this node
    nodes: Vec<String>,
    picker: NodeMap,
    pools: HashMap<String, PeerPool>,
    local: StandaloneDatabase,
}

impl ClusterDatabase {
    /// Builds the ring from `config.self_addr` plus `config.peers`.
    ///
    /// Duplicate peers and a peer equal to this node's own address are
    /// ignored. Peer connections are opened lazily on first use.
    pub fn new(config: &ServerConfig, local: StandaloneDatabase) -> Self {
        let self_addr = config.self_addr.clone();

        let mut nodes: Vec<String> = Vec::with_capacity(config.peers.len() + 1);
        for peer in &config.peers {
            if peer.is_empty() || *peer == self_addr || nodes.contains(peer) {
                continue;
            }
            nodes.push(peer.clone());
        }

        let pools = nodes
            .iter()
            .map(|peer| {
                let pool = PeerPool::new(
                    peer.clone(),
                    config.max_peer_connections,
                    config.peer_connect_timeout,
                );
                (peer.clone(), pool)
            })
            .collect();

        nodes.push(self_addr.clone());
        let mut picker = NodeMap::new();
        picker.add_node(&nodes);

        info!(self_addr = %self_addr, nodes = ?nodes, "Cluster ring built");

        Self {
            self_addr,
            nodes,
            picker,
            pools,
            local,
        }
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// Every node, peers first.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// The store this node serves itself.
    pub fn local(&self) -> &StandaloneDatabase {
        &self.local
    }

    /// Address of the node owning `key`.
    pub fn owner(&self, key: &[u8]) -> &str {
        self.picker.pick_node(key).unwrap_or(&self.self_addr)
    }

    /// Executes `args` on `node`, locally if it is this node.
    async fn relay(&self, node: &str, conn: &Connection, args: CmdLine) -> Reply {
        if node == self.self_addr {
            return self.local.exec(conn, args).await;
        }

        let Some(pool) = self.pools.get(node) else {
            return Reply::error(format!("ERR connection to '{}' not found", node));
        };

        match relay_remote(pool, conn.db_index(), &args).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(peer = node, error = %e, "Relay failed");
                Reply::error(format!("ERR {}", e))
            }
        }
    }

    /// Runs `args` on every node; replies come back in node order.
    async fn broadcast(&self, conn: &Connection, args: &CmdLine) -> Vec<Reply> {
        let wrapped: CmdLine = std::iter::once(Bytes::from_static(PEER_EXEC.as_bytes()))
            .chain(args.iter().cloned())
            .collect();

        join_all(self.nodes.iter().map(|node| {
            let line = if *node == self.self_addr {
                args.clone()
            } else {
                wrapped.clone()
            };
            self.relay(node, conn, line)
        }))
        .await
    }

    async fn exec_inner(&self, conn: &Connection, cmd_line: CmdLine) -> Reply {
        let Some(first) = cmd_line.first() else {
            return Reply::error("ERR empty command");
        };
        let name = command_name(first);

        let Some(route) = route_for(&name, self.local.commands()) else {
            return Reply::error(format!("ERR not supported cmd '{}'", name));
        };
        debug!(conn = conn.id(), cmd = %name, route = ?route, "Routing command");

        match route {
            Route::Local => self.local.exec(conn, cmd_line).await,
            Route::PeerLocal => self.local.exec(conn, cmd_line[1..].to_vec()).await,
            Route::Forward => {
                if cmd_line.len() < 2 {
                    return Reply::arg_num_error(&name);
                }
                let owner = self.owner(&cmd_line[1]);
                self.relay(owner, conn, cmd_line).await
            }
            Route::Broadcast(merge) => {
                let replies = self.broadcast(conn, &cmd_line).await;
                merge_replies(merge, replies)
            }
            Route::SameNode => {
                if cmd_line.len() != 3 {
                    return Reply::arg_num_error(&name);
                }
                let src = self.owner(&cmd_line[1]);
                let dest = self.owner(&cmd_line[2]);
                if src != dest {
                    return Reply::error(format!("ERR {} must be within the same node", name));
                }
                self.relay(src, conn, cmd_line).await
            }
        }
    }
}

/// Selects the caller's database on a pooled connection, then sends `args`.
///
/// The pooled client is returned on success and destroyed on any transport
/// failure, including a dropped future.
async fn relay_remote(pool: &PeerPool, db_index: usize, args: &CmdLine) -> Result<Reply, PeerError> {
    let mut client = pool.get().await?;

    let selected = client
        .send(&cmd_line(["SELECT", db_index.to_string().as_str()]))
        .await?;
    if selected.is_error() {
        return Ok(selected);
    }

    client.send(args).await
}

#[async_trait]
impl Database for ClusterDatabase {
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
                    "Routing panicked"
                );
                Reply::unknown_error()
            }
        }
    }

    async fn close(&self) {
        for pool in self.pools.values() {
            pool.close();
        }
        self.local.close().await;
    }

    fn after_client_close(&self, conn: &Connection) {
        self.local.after_client_close(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RespHandler;
    use crate::server::listen_and_serve;
    use crate::storage::Entity;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    struct Node {
        db: Arc<ClusterDatabase>,
        _shutdown: oneshot::Sender<()>,
    }

    fn cluster_config(self_addr: &str, peers: &[String]) -> ServerConfig {
        ServerConfig {
            self_addr: self_addr.to_string(),
            peers: peers.to_vec(),
            ..ServerConfig::default()
        }
    }

    /// Starts `n` cluster nodes serving on loopback.
    async fn start_cluster(n: usize) -> Vec<Node> {
        let mut listeners = Vec::new();
        for _ in 0..n {
            listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
        }
        let addrs: Vec<String> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().to_string())
            .collect();

        let mut nodes = Vec::new();
        for (listener, addr) in listeners.into_iter().zip(&addrs) {
            let config = cluster_config(addr, &addrs);
            let db = Arc::new(ClusterDatabase::new(&config, StandaloneDatabase::new(16)));
            let handler = Arc::new(RespHandler::new(db.clone()));
            let (tx, rx) = oneshot::channel::<()>();
            tokio::spawn(listen_and_serve(listener, handler, async move {
                let _ = rx.await;
            }));
            nodes.push(Node {
                db,
                _shutdown: tx,
            });
        }
        nodes
    }

    /// First generated key owned by `owner`.
    fn key_on(db: &ClusterDatabase, owner: &str, skip: &[&str]) -> String {
        (0..100_000)
            .map(|i| format!("key:{}", i))
            .find(|key| db.owner(key.as_bytes()) == owner && !skip.contains(&key.as_str()))
            .unwrap()
    }

    fn stored(node: &Node, db_index: usize, key: &str) -> Option<Bytes> {
        node.db
            .local()
            .db(db_index)
            .unwrap()
            .data()
            .get(key.as_bytes())
            .map(|entity| match entity {
                Entity::String(value) => value,
            })
    }

    #[tokio::test]
    async fn test_forward_to_owner() {
        let nodes = start_cluster(2).await;
        let remote = nodes[1].db.self_addr().to_string();
        let key = key_on(&nodes[0].db, &remote, &[]);
        let conn = Connection::detached();

        let reply = nodes[0].db.exec(&conn, cmd_line(["SET", key.as_str(), "v"])).await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(stored(&nodes[1], 0, &key), Some(Bytes::from("v")));
        assert_eq!(stored(&nodes[0], 0, &key), None);

        let reply = nodes[0].db.exec(&conn, cmd_line(["GET", key.as_str()])).await;
        assert_eq!(reply, Reply::bulk("v"));
    }

    #[tokio::test]
    async fn test_forward_carries_selected_db() {
        let nodes = start_cluster(2).await;
        let remote = nodes[1].db.self_addr().to_string();
        let key = key_on(&nodes[0].db, &remote, &[]);
        let conn = Connection::detached();

        assert_eq!(nodes[0].db.exec(&conn, cmd_line(["SELECT", "2"])).await, Reply::ok());
        nodes[0].db.exec(&conn, cmd_line(["SET", key.as_str(), "v"])).await;

        assert_eq!(stored(&nodes[1], 2, &key), Some(Bytes::from("v")));
        assert_eq!(stored(&nodes[1], 0, &key), None);
    }

    #[tokio::test]
    async fn test_broadcast_del_sums_counts() {
        let nodes = start_cluster(2).await;
        let here = nodes[0].db.self_addr().to_string();
        let there = nodes[1].db.self_addr().to_string();
        let k1 = key_on(&nodes[0].db, &here, &[]);
        let k2 = key_on(&nodes[0].db, &there, &[]);
        let conn = Connection::detached();

        nodes[0].db.exec(&conn, cmd_line(["SET", k1.as_str(), "1"])).await;
        nodes[0].db.exec(&conn, cmd_line(["SET", k2.as_str(), "2"])).await;

        // Issued against the other node as well, to check both directions
        let reply = nodes[1]
            .db
            .exec(&conn, cmd_line(["DEL", k1.as_str(), k2.as_str(), "missing"]))
            .await;
        assert_eq!(reply, Reply::integer(2));
        assert_eq!(stored(&nodes[0], 0, &k1), None);
        assert_eq!(stored(&nodes[1], 0, &k2), None);
    }

    #[tokio::test]
    async fn test_broadcast_flushdb_and_keys() {
        let nodes = start_cluster(2).await;
        let here = nodes[0].db.self_addr().to_string();
        let there = nodes[1].db.self_addr().to_string();
        let k1 = key_on(&nodes[0].db, &here, &[]);
        let k2 = key_on(&nodes[0].db, &there, &[]);
        let conn = Connection::detached();

        nodes[0].db.exec(&conn, cmd_line(["SET", k1.as_str(), "1"])).await;
        nodes[0].db.exec(&conn, cmd_line(["SET", k2.as_str(), "2"])).await;

        let Reply::MultiBulk(keys) = nodes[0].db.exec(&conn, cmd_line(["KEYS", "*"])).await else {
            panic!("expected a key list");
        };
        let mut keys: Vec<Bytes> = keys.into_iter().flatten().collect();
        keys.sort();
        let mut expected = vec![Bytes::from(k1.clone()), Bytes::from(k2.clone())];
        expected.sort();
        assert_eq!(keys, expected);

        assert_eq!(nodes[0].db.exec(&conn, cmd_line(["FLUSHDB"])).await, Reply::ok());
        assert_eq!(stored(&nodes[0], 0, &k1), None);
        assert_eq!(stored(&nodes[1], 0, &k2), None);
        assert_eq!(
            nodes[0].db.exec(&conn, cmd_line(["KEYS", "*"])).await,
            Reply::EmptyMultiBulk
        );
    }

    #[tokio::test]
    async fn test_del_with_unreachable_peer() {
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let config = cluster_config("127.0.0.1:1", &[dead.clone()]);
        let db = ClusterDatabase::new(&config, StandaloneDatabase::new(16));
        let conn = Connection::detached();

        let k1 = key_on(&db, "127.0.0.1:1", &[]);
        let k2 = key_on(&db, &dead, &[]);
        db.exec(&conn, cmd_line(["SET", k1.as_str(), "1"])).await;

        let reply = db
            .exec(&conn, cmd_line(["DEL", k1.as_str(), k2.as_str()]))
            .await;
        assert!(reply.is_error());

        let reply = db.exec(&conn, cmd_line(["GET", k2.as_str()])).await;
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn test_cross_node_rename_is_rejected() {
        let nodes = start_cluster(2).await;
        let here = nodes[0].db.self_addr().to_string();
        let there = nodes[1].db.self_addr().to_string();
        let k1 = key_on(&nodes[0].db, &here, &[]);
        let k2 = key_on(&nodes[0].db, &there, &[]);
        let conn = Connection::detached();

        nodes[0].db.exec(&conn, cmd_line(["SET", k1.as_str(), "1"])).await;
        nodes[0].db.exec(&conn, cmd_line(["SET", k2.as_str(), "2"])).await;

        let reply = nodes[0]
            .db
            .exec(&conn, cmd_line(["RENAME", k1.as_str(), k2.as_str()]))
            .await;
        assert_eq!(reply, Reply::error("ERR rename must be within the same node"));
        assert_eq!(stored(&nodes[0], 0, &k1), Some(Bytes::from("1")));
        assert_eq!(stored(&nodes[1], 0, &k2), Some(Bytes::from("2")));
    }

    #[tokio::test]
    async fn test_same_node_rename_is_relayed() {
        let nodes = start_cluster(2).await;
        let there = nodes[1].db.self_addr().to_string();
        let k1 = key_on(&nodes[0].db, &there, &[]);
        let k2 = key_on(&nodes[0].db, &there, &[k1.as_str()]);
        let conn = Connection::detached();

        nodes[0].db.exec(&conn, cmd_line(["SET", k1.as_str(), "1"])).await;
        let reply = nodes[0]
            .db
            .exec(&conn, cmd_line(["RENAME", k1.as_str(), k2.as_str()]))
            .await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(stored(&nodes[1], 0, &k1), None);
        assert_eq!(stored(&nodes[1], 0, &k2), Some(Bytes::from("1")));
    }

    #[tokio::test]
    async fn test_unsupported_and_malformed_commands() {
        let config = cluster_config("127.0.0.1:1", &["127.0.0.1:2".to_string()]);
        let db = ClusterDatabase::new(&config, StandaloneDatabase::new(16));
        let conn = Connection::detached();

        assert_eq!(
            db.exec(&conn, cmd_line(["HELLO"])).await,
            Reply::error("ERR not supported cmd 'hello'")
        );
        assert_eq!(
            db.exec(&conn, cmd_line(["GET"])).await,
            Reply::arg_num_error("get")
        );
        assert_eq!(
            db.exec(&conn, cmd_line(["RENAME", "a"])).await,
            Reply::arg_num_error("rename")
        );
        assert_eq!(db.exec(&conn, cmd_line(["PING"])).await, Reply::pong());
        assert!(db.exec(&conn, Vec::new()).await.is_error());
    }

    #[test]
    fn test_node_list_dedups_peers() {
        let peers = vec![
            "127.0.0.1:2".to_string(),
            "127.0.0.1:1".to_string(),
            "127.0.0.1:2".to_string(),
        ];
        let db = ClusterDatabase::new(
            &cluster_config("127.0.0.1:1", &peers),
            StandaloneDatabase::new(1),
        );
        assert_eq!(db.nodes(), ["127.0.0.1:2", "127.0.0.1:1"]);
    }
}
