//! Command Module
//!
//! This module implements the commands the keyspace understands and the
//! registry the database layer dispatches through.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  ParseStream    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  Db::exec       │  (database module)
//! │                 │
//! │  - Lookup       │──> CommandTable (this module)
//! │  - Arity check  │
//! │  - Execute      │
//! │  - AOF append   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │      Dict       │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `GET`, `SET`, `SETNX`, `GETSET`, `STRLEN`
//!
//! ### Key Commands
//! - `DEL`, `EXISTS`, `TYPE`, `RENAME`, `RENAMENX`, `KEYS`, `FLUSHDB`
//!
//! ### Connection Commands
//! - `PING`
//! - `SELECT` is handled by the database layer, since it changes connection state

mod connection;
mod keys;
pub mod registry;
mod string;

pub use registry::{command_name, Arity, CommandFlags, CommandSpec, CommandTable, ExecFn};
