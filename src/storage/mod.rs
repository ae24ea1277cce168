//! Storage Module
//!
//! This module provides the in-memory keyspace used by each logical database.
//!
//! ## Components
//!
//! - `dict`: The sharded, thread-safe key-value map and the `KEYS` glob matcher
//!
//! ## Example
//!
//! ```
//! use ringkv::storage::{Dict, Entity};
//! use bytes::Bytes;
//!
//! let dict = Dict::new();
//!
//! // Basic operations
//! dict.put(Bytes::from("name"), Entity::String(Bytes::from("Ariz")));
//! assert!(dict.contains(b"name"));
//!
//! // Pattern scan
//! let keys = dict.keys(b"na*");
//! assert_eq!(keys, vec![Bytes::from("name")]);
//! ```

pub mod dict;

// Re-export commonly used types
pub use dict::{Dict, Entity};
