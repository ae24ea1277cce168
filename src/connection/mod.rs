//! Connection Module
//!
//! This module manages client connections to ringkv. Each client is served
//! by its own async task, so the server can handle thousands of concurrent
//! clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   RespHandler                               │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ ParseStream │───>│  Database   │───>│ Connection  │     │
//! │  │ (commands)  │    │   ::exec    │    │   ::write   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: several commands in one TCP packet are answered in order
//! - **Drain-based close**: a connection waits for its in-flight write (up to
//!   [`CLOSE_TIMEOUT`]) before the socket is shut down
//! - **Statistics**: connection and command counters in [`ConnectionStats`]

pub mod conn;
pub mod handler;
pub mod wait;

pub use conn::{Connection, ConnectionError, CLOSE_TIMEOUT};
pub use handler::{ConnectionStats, RespHandler};
pub use wait::Wait;
