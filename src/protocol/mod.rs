//! RESP Protocol Implementation
//!
//! This module turns raw bytes into replies and command lines, and replies back
//! into bytes.
//!
//! ## Modules
//!
//! - `types`: Defines the `Reply` enum and its serialization
//! - `parser`: The line-oriented parser state machine
//! - `stream`: Drives the parser over an async byte stream
//!
//! ## Example
//!
//! ```ignore
//! use ringkv::protocol::{ParseStream, Reply};
//!
//! // Parsing incoming data
//! let (reader, writer) = socket.into_split();
//! let mut stream = ParseStream::new(reader);
//! while let Some(payload) = stream.next().await {
//!     // ...
//! }
//!
//! // Creating responses
//! let bytes = Reply::bulk("Ariz").serialize();
//! ```

pub mod parser;
pub mod stream;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_bytes, ParseError, ParseMode, ParseResult, Parser};
pub use stream::{ParseStream, Payload, StreamError};
pub use types::{cmd_line, CmdLine, Reply};
