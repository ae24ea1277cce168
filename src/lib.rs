//! # ringkv - A Redis-Compatible Key-Value Server
//!
//! ringkv speaks the Redis wire protocol (RESP), persists writes to an
//! append-only file, and can run as one node of a hash-sharded cluster that
//! relays and broadcasts commands across a static set of peers.
//!
//! ## Features
//!
//! - **Redis-Compatible**: RESP framing and inline commands, so `redis-cli`
//!   and ordinary client libraries work unchanged
//! - **Append-Only Persistence**: write commands are queued to a background
//!   writer and replayed at startup
//! - **Clustering**: a consistent-hash ring decides which node owns a key
//! - **Async I/O**: built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               ringkv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────┐     │
//! │  │ TCP Server  │───>│ RespHandler │───>│  Arc<dyn Database>       │     │
//! │  │ (Listener)  │    │ ParseStream │    │  Standalone | Cluster    │     │
//! │  └─────────────┘    └─────────────┘    └──────┬───────────┬───────┘     │
//! │                                               │           │             │
//! │                                               ▼           ▼             │
//! │                    ┌──────────────────────────────┐  ┌───────────────┐  │
//! │                    │ Db 0..N  (Dict, 64 shards)   │  │ NodeMap ring  │  │
//! │                    └──────────────┬───────────────┘  │ PeerPool/peer │  │
//! │                                   │ write commands   └───────────────┘  │
//! │                                   ▼                                     │
//! │                    ┌──────────────────────────────┐                     │
//! │                    │ AofHandler (background task) │                     │
//! │                    └──────────────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use ringkv::config::ServerConfig;
//! use ringkv::connection::RespHandler;
//! use ringkv::database::build_database;
//! use ringkv::server::{listen_and_serve, shutdown_signal};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let database = build_database(&config).await?;
//!     let handler = Arc::new(RespHandler::new(database));
//!
//!     let listener = TcpListener::bind(config.bind_address()).await?;
//!     listen_and_serve(listener, handler, shutdown_signal()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`, `SELECT index`
//! - `SET key value`, `SETNX key value`, `GET key`, `GETSET key value`, `STRLEN key`
//! - `DEL key [key ...]`, `EXISTS key [key ...]`, `TYPE key`, `KEYS pattern`
//! - `RENAME key newkey`, `RENAMENX key newkey`, `FLUSHDB`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP parser, reply types, and the streaming parser task
//! - [`storage`]: sharded keyspace dictionary
//! - [`commands`]: command registry and command implementations
//! - [`database`]: the `Database` trait and the standalone implementation
//! - [`aof`]: append-only file writer and replay
//! - [`cluster`]: consistent-hash ring, peer pools, and the command router
//! - [`connection`]: per-client connection state and the connection handler
//! - [`server`]: accept loop and signal handling
//! - [`config`]: redis.conf-style file and command-line flags

pub mod aof;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod connection;
pub mod database;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{Cli, ServerConfig};
pub use connection::{Connection, ConnectionStats, RespHandler};
pub use database::{build_database, Database, StandaloneDatabase};
pub use protocol::{CmdLine, ParseError, Reply};
pub use storage::Dict;

/// The default port ringkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host ringkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ringkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
