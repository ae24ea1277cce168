//! Cluster Module
//!
//! Hash-sharded cluster mode. Each node owns the keys that hash to it on a
//! consistent-hash ring built from a static address list, and relays or
//! broadcasts commands for keys it does not own.
//!
//! ## Components
//!
//! - [`NodeMap`]: the consistent-hash ring
//! - [`PeerClient`] / [`PeerPool`]: pooled outbound connections to peers
//! - [`route_for`] / [`merge_replies`]: the per-command routing table
//! - [`ClusterDatabase`]: the [`Database`](crate::database::Database) that
//!   ties them together

pub mod client;
pub mod consistent_hash;
pub mod database;
pub mod pool;
pub mod router;

pub use client::{PeerClient, PeerError};
pub use consistent_hash::{crc32_ieee, HashFn, NodeMap};
pub use database::ClusterDatabase;
pub use pool::{PeerPool, PooledClient};
pub use router::{merge_replies, route_for, Merge, Route, PEER_EXEC};
