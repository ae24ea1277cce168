//! Append-Only File Persistence
//!
//! When `appendonly` is enabled, every successful write command is appended to
//! a file in multi bulk form, and the file is replayed at startup to rebuild
//! the keyspace.
//!
//! ## Modules
//!
//! - `handler`: The background writer task and the per-database producer handle
//! - `loader`: Startup replay
//!
//! ## File Format
//!
//! ```text
//! *3\r\n$3\r\nset\r\n$1\r\na\r\n$1\r\n1\r\n      SET a 1      (db 0)
//! *2\r\n$6\r\nselect\r\n$1\r\n1\r\n              SELECT 1
//! *3\r\n$3\r\nset\r\n$1\r\na\r\n$1\r\n9\r\n      SET a 9      (db 1)
//! ```

pub mod handler;
pub mod loader;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use handler::{AofHandle, AofHandler, AofPayload, AOF_QUEUE_SIZE};
pub use loader::{load_aof, Replayed};

/// Errors from opening the append-only file.
#[derive(Debug, Error)]
pub enum AofError {
    /// The file could not be opened
    #[error("cannot open AOF '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
