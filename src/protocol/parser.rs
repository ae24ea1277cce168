//! Line-Oriented RESP Parser
//!
//! This module implements the per-connection parser state machine. It never
//! touches a socket: the caller reads the next line (or the next raw bulk
//! payload) and hands it to [`Parser`], which either produces a complete
//! reply, asks for more input, or reports a protocol error.
//!
//! ## How the Parser Works
//!
//! The parser alternates between two ways of reading input:
//!
//! - **Line mode**: the caller reads up to the next `\n`. The line must end in
//!   `\r\n`.
//! - **Bulk mode**: after a `$<n>` header the caller reads exactly `n + 2`
//!   bytes. [`Parser::pending_bulk_len`] tells the caller which mode is active.
//!
//! ```text
//! *3\r\n          -> expect 3 args
//! $3\r\n          -> next raw read is 3 + 2 bytes
//! SET\r\n         -> arg 1
//! $1\r\n
//! k\r\n           -> arg 2
//! $1\r\n
//! v\r\n           -> arg 3, complete: MultiBulk([SET, k, v])
//! ```
//!
//! Any malformed input yields a [`ParseError`] and resets the state so that the
//! next line is parsed from scratch. The connection stays usable.

use crate::protocol::types::{prefix, Reply, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
///
/// All of them are recoverable: the parser resets and continues with the next line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A line did not end in CRLF
    #[error("ERR Protocol error: '{0}'")]
    MissingCrlf(String),

    /// A header line (`*`, `$`, `:`) carried an invalid number
    #[error("ERR Protocol error: invalid length or integer in '{0}'")]
    InvalidInteger(String),

    /// A header declared a length the protocol does not allow
    #[error("ERR Protocol error: invalid header '{0}'")]
    InvalidHeader(String),

    /// Unknown type prefix byte (only when parsing replies)
    #[error("ERR Protocol error: unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// The message exceeds maximum allowed size
    #[error("ERR Protocol error: message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one multi bulk
pub const MAX_MULTI_BULK_LEN: usize = 1024 * 1024;

/// Maximum length of a line read in line mode
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Most input bytes quoted back in a protocol error
pub const MAX_ERROR_EXCERPT: usize = 64;

/// Upper bound on argument storage reserved from a header alone
const MAX_PREALLOC: usize = 1024;

/// What the parsed stream is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Client requests. A lone `$<n>` bulk is treated as a one-argument
    /// command line and non-prefixed lines are inline commands.
    Command,

    /// Server replies, as read by a peer client. A lone bulk stays a bulk reply.
    Reply,
}

/// Mutable per-connection parser state.
#[derive(Debug, Default)]
struct ReadState {
    /// Inside a `*` or `$` message that spans several lines
    reading_multi_line: bool,
    /// Number of arguments the header announced
    expected_args: usize,
    /// `*` or `$`
    msg_type: u8,
    /// Arguments collected so far
    args: Vec<Option<Bytes>>,
    /// Length of the next raw bulk read, if one was announced
    bulk_len: Option<usize>,
}

impl ReadState {
    fn finished(&self) -> bool {
        self.expected_args > 0 && self.args.len() == self.expected_args
    }
}

/// The RESP parser state machine.
///
/// # Example
///
/// ```
/// use ringkv::protocol::parser::{Parser, ParseMode};
/// use ringkv::protocol::Reply;
/// use bytes::Bytes;
///
/// let mut parser = Parser::new(ParseMode::Command);
/// assert_eq!(parser.feed_line(b"*1\r\n").unwrap(), None);
/// assert_eq!(parser.feed_line(b"$4\r\n").unwrap(), None);
/// assert_eq!(parser.pending_bulk_len(), Some(4));
/// let reply = parser.feed_raw(Bytes::from_static(b"PING\r\n")).unwrap();
/// assert_eq!(reply, Some(Reply::multi_bulk([Bytes::from("PING")])));
/// ```
#[derive(Debug)]
pub struct Parser {
    mode: ParseMode,
    state: ReadState,
}

impl Parser {
    /// Creates a new parser instance.
    pub fn new(mode: ParseMode) -> Self {
        Self {
            mode,
            state: ReadState::default(),
        }
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// Returns the number of payload bytes (excluding CRLF) the next read must
    /// deliver through [`Parser::feed_raw`], or `None` when a line is expected.
    pub fn pending_bulk_len(&self) -> Option<usize> {
        self.state.bulk_len
    }

    /// Returns true while inside a message spanning several lines.
    pub fn is_mid_message(&self) -> bool {
        self.state.reading_multi_line
    }

    /// Feeds one line, including its trailing `\r\n`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(reply))` - a complete message was parsed
    /// - `Ok(None)` - more input is needed
    /// - `Err(e)` - protocol error; the state has been reset
    pub fn feed_line(&mut self, line: &[u8]) -> ParseResult<Option<Reply>> {
        let result = self.process_line(line);
        self.settle(result)
    }

    /// Feeds the raw payload of a bulk string announced by a `$<n>` header.
    ///
    /// `raw` must be exactly `n + 2` bytes and end in `\r\n`.
    pub fn feed_raw(&mut self, raw: Bytes) -> ParseResult<Option<Reply>> {
        let result = self.process_raw(raw);
        self.settle(result)
    }

    /// Resets the state after an error or a completed message.
    fn settle(&mut self, result: ParseResult<Option<Reply>>) -> ParseResult<Option<Reply>> {
        match &result {
            Ok(Some(_)) | Err(_) => self.reset(),
            Ok(None) => {}
        }
        result
    }

    /// Drops any partially parsed message.
    pub fn reset(&mut self) {
        self.state = ReadState::default();
    }

    fn process_line(&mut self, line: &[u8]) -> ParseResult<Option<Reply>> {
        let content = strip_crlf(line)?;

        if !self.state.reading_multi_line {
            return self.process_header(content);
        }

        self.process_body_line(content)
    }

    /// Dispatches on the first byte of a fresh line.
    fn process_header(&mut self, content: &[u8]) -> ParseResult<Option<Reply>> {
        let Some(&first) = content.first() else {
            // Blank line between commands, e.g. a bare `\r\n` from a terminal
            return match self.mode {
                ParseMode::Command => Ok(None),
                ParseMode::Reply => Err(ParseError::InvalidHeader(String::new())),
            };
        };

        match first {
            prefix::MULTI_BULK => self.parse_multi_bulk_header(content),
            prefix::BULK_STRING => self.parse_bulk_header(content),
            prefix::STATUS => Ok(Some(Reply::Status(lossy(&content[1..])))),
            prefix::ERROR => Ok(Some(Reply::Error(lossy(&content[1..])))),
            prefix::INTEGER => {
                let n = parse_integer(content)?;
                Ok(Some(Reply::Integer(n)))
            }
            other => match self.mode {
                ParseMode::Command => Ok(parse_inline(content)),
                ParseMode::Reply => Err(ParseError::UnknownPrefix(other)),
            },
        }
    }

    /// `*<count>`
    fn parse_multi_bulk_header(&mut self, content: &[u8]) -> ParseResult<Option<Reply>> {
        let count = parse_integer(content)?;

        if count == 0 {
            return Ok(Some(Reply::EmptyMultiBulk));
        }
        if count == -1 && self.mode == ParseMode::Reply {
            return Ok(Some(Reply::NullBulk));
        }
        if count < 0 {
            return Err(ParseError::InvalidHeader(excerpt(content)));
        }

        let count = count as usize;
        if count > MAX_MULTI_BULK_LEN {
            return Err(ParseError::MessageTooLarge {
                size: count,
                max: MAX_MULTI_BULK_LEN,
            });
        }

        self.state.msg_type = prefix::MULTI_BULK;
        self.state.reading_multi_line = true;
        self.state.expected_args = count;
        self.state.args = Vec::with_capacity(count.min(MAX_PREALLOC));
        Ok(None)
    }

    /// `$<len>` at the top level
    fn parse_bulk_header(&mut self, content: &[u8]) -> ParseResult<Option<Reply>> {
        let len = parse_integer(content)?;

        if len == -1 {
            return Ok(Some(Reply::NullBulk));
        }

        // An empty top-level bulk is only meaningful as a reply
        let allowed = match self.mode {
            ParseMode::Command => len > 0,
            ParseMode::Reply => len >= 0,
        };
        if !allowed {
            return Err(ParseError::InvalidHeader(excerpt(content)));
        }

        let len = checked_bulk_len(len)?;
        self.state.msg_type = prefix::BULK_STRING;
        self.state.reading_multi_line = true;
        self.state.expected_args = 1;
        self.state.args = Vec::with_capacity(1);
        self.state.bulk_len = Some(len);
        Ok(None)
    }

    /// A line inside a multi bulk: either a `$<n>` sub-header or a bare argument.
    fn process_body_line(&mut self, content: &[u8]) -> ParseResult<Option<Reply>> {
        if content.first() == Some(&prefix::BULK_STRING) {
            let len = parse_integer(content)?;
            if len == -1 {
                self.state.args.push(None);
                return Ok(self.complete_if_finished());
            }
            if len < 0 {
                return Err(ParseError::InvalidHeader(excerpt(content)));
            }
            self.state.bulk_len = Some(checked_bulk_len(len)?);
            return Ok(None);
        }

        if self.mode == ParseMode::Reply {
            return Err(ParseError::InvalidHeader(excerpt(content)));
        }

        self.state.args.push(Some(Bytes::copy_from_slice(content)));
        Ok(self.complete_if_finished())
    }

    fn process_raw(&mut self, raw: Bytes) -> ParseResult<Option<Reply>> {
        let Some(len) = self.state.bulk_len.take() else {
            return Err(ParseError::InvalidHeader(excerpt(&raw)));
        };

        if raw.len() != len + 2 || &raw[len..] != CRLF {
            return Err(ParseError::MissingCrlf(excerpt(&raw)));
        }

        self.state.args.push(Some(raw.slice(..len)));
        Ok(self.complete_if_finished())
    }

    fn complete_if_finished(&mut self) -> Option<Reply> {
        if !self.state.finished() {
            return None;
        }

        let args = std::mem::take(&mut self.state.args);
        let reply = match (self.mode, self.state.msg_type) {
            (ParseMode::Reply, prefix::BULK_STRING) => {
                Reply::Bulk(args.into_iter().next().flatten())
            }
            _ => Reply::MultiBulk(args),
        };
        Some(reply)
    }
}

/// Checks the trailing CRLF and returns the line content without it.
fn strip_crlf(line: &[u8]) -> ParseResult<&[u8]> {
    match line {
        [content @ .., b'\r', b'\n'] => Ok(content),
        _ => Err(ParseError::MissingCrlf(excerpt(line))),
    }
}

/// Parses the number following a one-byte type prefix.
fn parse_integer(content: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(&content[1..])
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidInteger(excerpt(content)))
}

fn checked_bulk_len(len: i64) -> ParseResult<usize> {
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }
    Ok(len)
}

/// Parses an inline command such as `PING` or `SET k v` typed into a terminal.
fn parse_inline(content: &[u8]) -> Option<Reply> {
    let args: Vec<Bytes> = content
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();

    if args.is_empty() {
        return None;
    }
    Some(Reply::multi_bulk(args))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Offending input quoted in an error, cut to [`MAX_ERROR_EXCERPT`] bytes.
fn excerpt(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_ERROR_EXCERPT {
        lossy(bytes)
    } else {
        format!("{}...", lossy(&bytes[..MAX_ERROR_EXCERPT]))
    }
}

/// Parses every message in a complete in-memory buffer.
///
/// This drives the same state machine the network stream uses, which makes it
/// handy for tests and benchmarks. A trailing partial message is ignored.
pub fn parse_bytes(mut buf: &[u8], mode: ParseMode) -> Vec<ParseResult<Reply>> {
    let mut parser = Parser::new(mode);
    let mut results = Vec::new();

    loop {
        let step = match parser.pending_bulk_len() {
            Some(len) => {
                if buf.len() < len + 2 {
                    break;
                }
                let (raw, rest) = buf.split_at(len + 2);
                buf = rest;
                parser.feed_raw(Bytes::copy_from_slice(raw))
            }
            None => {
                let Some(end) = buf.iter().position(|&b| b == b'\n') else {
                    break;
                };
                let (line, rest) = buf.split_at(end + 1);
                buf = rest;
                parser.feed_line(line)
            }
        };

        match step {
            Ok(Some(reply)) => results.push(Ok(reply)),
            Ok(None) => {}
            Err(e) => results.push(Err(e)),
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::cmd_line;

    fn parse_commands(input: &[u8]) -> Vec<ParseResult<Reply>> {
        parse_bytes(input, ParseMode::Command)
    }

    #[test]
    fn test_parse_set_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        assert_eq!(
            parse_commands(input),
            vec![Ok(Reply::multi_bulk(cmd_line(["SET", "user:101", "Ariz"])))]
        );
    }

    #[test]
    fn test_parse_status_error_integer() {
        let results = parse_commands(b"+OK\r\n-ERR boom\r\n:42\r\n:-7\r\n");
        assert_eq!(
            results,
            vec![
                Ok(Reply::status("OK")),
                Ok(Reply::error("ERR boom")),
                Ok(Reply::integer(42)),
                Ok(Reply::integer(-7)),
            ]
        );
    }

    #[test]
    fn test_parse_empty_multi_bulk() {
        assert_eq!(parse_commands(b"*0\r\n"), vec![Ok(Reply::EmptyMultiBulk)]);
    }

    #[test]
    fn test_parse_null_bulk() {
        assert_eq!(parse_commands(b"$-1\r\n"), vec![Ok(Reply::NullBulk)]);
    }

    #[test]
    fn test_lone_bulk_is_a_command_line() {
        assert_eq!(
            parse_commands(b"$4\r\nPING\r\n"),
            vec![Ok(Reply::multi_bulk(cmd_line(["PING"])))]
        );
    }

    #[test]
    fn test_lone_bulk_in_reply_mode_is_a_bulk() {
        assert_eq!(
            parse_bytes(b"$4\r\nAriz\r\n$0\r\n\r\n", ParseMode::Reply),
            vec![Ok(Reply::bulk("Ariz")), Ok(Reply::bulk(""))]
        );
    }

    #[test]
    fn test_zero_length_top_level_bulk_is_rejected_for_commands() {
        let results = parse_commands(b"$0\r\n*1\r\n$4\r\nPING\r\n");
        assert!(matches!(results[0], Err(ParseError::InvalidHeader(_))));
        assert_eq!(results[1], Ok(Reply::multi_bulk(cmd_line(["PING"]))));
    }

    #[test]
    fn test_empty_argument_inside_multi_bulk() {
        assert_eq!(
            parse_commands(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n"),
            vec![Ok(Reply::multi_bulk(cmd_line(["SET", "k", ""])))]
        );
    }

    #[test]
    fn test_null_element_inside_multi_bulk() {
        assert_eq!(
            parse_commands(b"*2\r\n$1\r\na\r\n$-1\r\n"),
            vec![Ok(Reply::MultiBulk(vec![Some(Bytes::from("a")), None]))]
        );
    }

    #[test]
    fn test_raw_payload_starting_with_dollar_is_data() {
        assert_eq!(
            parse_commands(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\n$5\r\n"),
            vec![Ok(Reply::multi_bulk(cmd_line(["SET", "k", "$5"])))]
        );
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let results = parse_commands(b"*1\r\n$5\r\nhel\r\n\r\n");
        assert_eq!(
            results,
            vec![Ok(Reply::MultiBulk(vec![Some(Bytes::from_static(b"hel\r\n"))]))]
        );
    }

    #[test]
    fn test_negative_multi_bulk_is_protocol_error_and_recovers() {
        let results = parse_commands(b"*-1\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(ParseError::InvalidHeader(_))));
        assert_eq!(results[1], Ok(Reply::multi_bulk(cmd_line(["PING"]))));
    }

    #[test]
    fn test_missing_cr_is_protocol_error_and_recovers() {
        let results = parse_commands(b"*1\n*1\r\n$4\r\nPING\r\n");
        assert!(matches!(results[0], Err(ParseError::MissingCrlf(_))));
        assert_eq!(results[1], Ok(Reply::multi_bulk(cmd_line(["PING"]))));
    }

    #[test]
    fn test_bad_bulk_terminator_resets_state() {
        // Declared 3 bytes but the terminator is wrong
        let results = parse_commands(b"*1\r\n$3\r\nGETxx*1\r\n$4\r\nPING\r\n");
        assert!(matches!(results[0], Err(ParseError::MissingCrlf(_))));
        assert_eq!(results[1], Ok(Reply::multi_bulk(cmd_line(["PING"]))));
    }

    #[test]
    fn test_invalid_integer() {
        let results = parse_commands(b":not_a_number\r\n*abc\r\n$x\r\n");
        assert_eq!(results.len(), 3);
        for result in results {
            assert!(matches!(result, Err(ParseError::InvalidInteger(_))));
        }
    }

    #[test]
    fn test_bulk_too_large() {
        let results = parse_commands(b"*1\r\n$999999999999\r\n");
        assert!(matches!(
            results[0],
            Err(ParseError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_inline_command() {
        assert_eq!(
            parse_commands(b"SET  key value\r\n\r\nPING\r\n"),
            vec![
                Ok(Reply::multi_bulk(cmd_line(["SET", "key", "value"]))),
                Ok(Reply::multi_bulk(cmd_line(["PING"]))),
            ]
        );
    }

    #[test]
    fn test_inline_rejected_in_reply_mode() {
        let results = parse_bytes(b"hello\r\n", ParseMode::Reply);
        assert_eq!(results, vec![Err(ParseError::UnknownPrefix(b'h'))]);
    }

    #[test]
    fn test_state_resets_between_pipelined_commands() {
        let mut input = Vec::new();
        for line in [cmd_line(["SET", "a", "1"]), cmd_line(["GET", "a"])] {
            input.extend(Reply::multi_bulk(line).serialize());
        }
        let results = parse_commands(&input);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], Ok(Reply::multi_bulk(cmd_line(["GET", "a"]))));
    }

    #[test]
    fn test_roundtrip() {
        let lines = [
            cmd_line(["SET", "key", "value"]),
            cmd_line(["PING"]),
            cmd_line(["DEL", "k1", "k2", "k3"]),
            cmd_line(["SET", "binary", "\u{0}\r\n$*"]),
        ];
        for line in lines {
            let original = Reply::multi_bulk(line.clone());
            let serialized = original.serialize();
            let parsed = parse_commands(&serialized);
            assert_eq!(parsed, vec![Ok(original.clone())]);
            let reparsed = parsed[0].clone().unwrap();
            assert_eq!(reparsed.serialize(), serialized);
            assert_eq!(reparsed.into_cmd_line(), Some(line));
        }
    }

    #[test]
    fn test_pending_bulk_len_tracks_mode() {
        let mut parser = Parser::new(ParseMode::Command);
        assert_eq!(parser.pending_bulk_len(), None);
        parser.feed_line(b"*2\r\n").unwrap();
        assert!(parser.is_mid_message());
        parser.feed_line(b"$3\r\n").unwrap();
        assert_eq!(parser.pending_bulk_len(), Some(3));
        parser.feed_raw(Bytes::from_static(b"GET\r\n")).unwrap();
        assert_eq!(parser.pending_bulk_len(), None);
        assert!(parser.is_mid_message());
    }
}
