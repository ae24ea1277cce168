//! RESP Reply Types
//!
//! This module defines the reply values that travel over the wire, both as
//! parsed input and as responses written back to clients.
//!
//! ## Protocol Format
//!
//! Each reply kind starts with a type prefix byte:
//! - `+` Status
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Multi Bulk (array of bulk strings)
//!
//! All lines are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command 'foo'\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Null Bulk String: `$-1\r\n`
//! Multi Bulk: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Empty Multi Bulk: `*0\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const MULTI_BULK: u8 = b'*';
}

/// A command line: element 0 is the command name, the rest are arguments.
pub type CmdLine = Vec<Bytes>;

/// Error text sent when execution fails in an unexpected way.
pub const UNKNOWN_ERROR: &str = "Err unknown";

/// A reply value.
///
/// Every variant has exactly one canonical byte encoding, and a reply is an
/// error exactly when its encoding starts with `-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<text>\r\n`
    Status(String),

    /// `-<text>\r\n`
    Error(String),

    /// `:<decimal>\r\n`
    Integer(i64),

    /// `$<len>\r\n<bytes>\r\n`, or the null bulk form when the payload is `None`.
    Bulk(Option<Bytes>),

    /// `$-1\r\n`
    NullBulk,

    /// `*<count>\r\n` followed by each element's bulk (or null bulk) encoding.
    MultiBulk(Vec<Option<Bytes>>),

    /// `*0\r\n`
    EmptyMultiBulk,

    /// Nothing is written.
    NoReply,
}

impl Reply {
    /// Creates a status reply.
    ///
    /// # Example
    /// ```
    /// use ringkv::protocol::Reply;
    /// assert_eq!(Reply::status("OK").serialize(), b"+OK\r\n");
    /// ```
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(single_line(s.into()))
    }

    /// Creates an error reply.
    ///
    /// # Example
    /// ```
    /// use ringkv::protocol::Reply;
    /// let err = Reply::error("ERR unknown command 'foo'");
    /// assert!(err.is_error());
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(single_line(s.into()))
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a bulk string reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn null_bulk() -> Self {
        Reply::NullBulk
    }

    /// Creates a multi bulk reply from a command line.
    ///
    /// An empty line still serializes as `*0\r\n`.
    pub fn multi_bulk(args: impl IntoIterator<Item = Bytes>) -> Self {
        Reply::MultiBulk(args.into_iter().map(Some).collect())
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Common response for PING
    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    /// The reply sent when execution panicked or produced nothing.
    pub fn unknown_error() -> Self {
        Reply::Error(UNKNOWN_ERROR.to_string())
    }

    /// Reply for a command invoked with the wrong number of arguments.
    pub fn arg_num_error(cmd: &str) -> Self {
        Reply::Error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd
        ))
    }

    /// Serializes the reply to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => write_line(buf, prefix::STATUS, s),
            Reply::Error(s) => write_line(buf, prefix::ERROR, s),
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => write_bulk(buf, data.as_deref()),
            Reply::NullBulk => write_bulk(buf, None),
            Reply::MultiBulk(args) => {
                buf.push(prefix::MULTI_BULK);
                buf.extend_from_slice(args.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for arg in args {
                    write_bulk(buf, arg.as_deref());
                }
            }
            Reply::EmptyMultiBulk => buf.extend_from_slice(b"*0\r\n"),
            Reply::NoReply => {}
        }
    }

    /// Returns true if this reply is an error, i.e. its encoding starts with `-`.
    pub fn is_error(&self) -> bool {
        match self {
            Reply::Error(_) => true,
            Reply::Status(_)
            | Reply::Integer(_)
            | Reply::Bulk(_)
            | Reply::NullBulk
            | Reply::MultiBulk(_)
            | Reply::EmptyMultiBulk
            | Reply::NoReply => false,
        }
    }

    /// Returns the error text if this is an error reply.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Reply::Error(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Consumes a multi bulk reply and returns it as a command line.
    ///
    /// Null elements become empty arguments.
    pub fn into_cmd_line(self) -> Option<CmdLine> {
        match self {
            Reply::MultiBulk(args) => Some(args.into_iter().map(Option::unwrap_or_default).collect()),
            _ => None,
        }
    }
}

/// Replaces CR and LF so the text fits on one protocol line.
fn single_line(s: String) -> String {
    if s.contains(['\r', '\n']) {
        s.replace(['\r', '\n'], " ")
    } else {
        s
    }
}

/// Writes a `+` or `-` line. CR and LF in the text are written as spaces.
fn write_line(buf: &mut Vec<u8>, prefix: u8, text: &str) {
    buf.push(prefix);
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    buf.extend_from_slice(CRLF);
}

fn write_bulk(buf: &mut Vec<u8>, data: Option<&[u8]>) {
    buf.push(prefix::BULK_STRING);
    match data {
        Some(data) => {
            buf.extend_from_slice(data.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(data);
            buf.extend_from_slice(CRLF);
        }
        None => {
            buf.extend_from_slice(b"-1");
            buf.extend_from_slice(CRLF);
        }
    }
}

/// Builds a command line from string-like parts.
///
/// ```
/// use ringkv::protocol::types::cmd_line;
/// let line = cmd_line(["SELECT", "1"]);
/// assert_eq!(line.len(), 2);
/// ```
pub fn cmd_line<I, S>(parts: I) -> CmdLine
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    parts
        .into_iter()
        .map(|p| Bytes::copy_from_slice(p.as_ref()))
        .collect()
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(Some(data)) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Bulk(None) | Reply::NullBulk => write!(f, "(nil)"),
            Reply::MultiBulk(args) => {
                for (i, arg) in args.iter().enumerate() {
                    match arg {
                        Some(data) => {
                            writeln!(f, "{}) \"{}\"", i + 1, String::from_utf8_lossy(data))?
                        }
                        None => writeln!(f, "{}) (nil)", i + 1)?,
                    }
                }
                Ok(())
            }
            Reply::EmptyMultiBulk => write!(f, "(empty array)"),
            Reply::NoReply => Ok(()),
        }
    }
}
