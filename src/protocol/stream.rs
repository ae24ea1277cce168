//! Streaming Parse Driver
//!
//! [`ParseStream`] turns any `AsyncRead` into a pull-based sequence of parse
//! results. A background task reads lines (or raw bulk payloads) and feeds them
//! through the [`Parser`] state machine; results are handed over a channel of
//! capacity one, so the reader never runs ahead of the consumer by more than a
//! single message.
//!
//! ## Termination
//!
//! - Protocol errors are yielded and the stream keeps going.
//! - A transport error (EOF, truncated message, I/O failure) is yielded once,
//!   then the stream ends.
//! - A panic inside the parser task is logged and ends the stream.

use crate::protocol::parser::{ParseError, ParseMode, Parser, MAX_LINE_LEN};
use crate::protocol::types::Reply;
use bytes::Bytes;
use futures::FutureExt;
use std::io;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace};

/// Errors yielded by a [`ParseStream`].
#[derive(Debug, Error)]
pub enum StreamError {
    /// Malformed input; the stream continues with the next line
    #[error(transparent)]
    Protocol(#[from] ParseError),

    /// The peer closed the stream between messages
    #[error("connection closed")]
    Eof,

    /// The stream ended in the middle of a message
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Returns true if the error ends the stream.
    pub fn is_transport(&self) -> bool {
        !matches!(self, StreamError::Protocol(_))
    }
}

/// One item produced by a [`ParseStream`].
pub type Payload = Result<Reply, StreamError>;

/// A lazy, in-order sequence of parse results read from a byte stream.
///
/// # Example
///
/// ```
/// use ringkv::protocol::{ParseStream, Reply};
///
/// # tokio_test::block_on(async {
/// let input: &'static [u8] = b"*1\r\n$4\r\nPING\r\n";
/// let mut stream = ParseStream::new(input);
/// let first = stream.next().await.unwrap().unwrap();
/// assert_eq!(first, Reply::multi_bulk([bytes::Bytes::from("PING")]));
/// # });
/// ```
#[derive(Debug)]
pub struct ParseStream {
    rx: mpsc::Receiver<Payload>,
    task: JoinHandle<()>,
}

impl ParseStream {
    /// Parses client commands from `reader`.
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::with_mode(reader, ParseMode::Command)
    }

    /// Parses server replies from `reader`.
    pub fn replies<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::with_mode(reader, ParseMode::Reply)
    }

    pub fn with_mode<R>(reader: R, mode: ParseMode) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(parse_loop(reader, mode, tx))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                error!(
                    panic = %crate::database::panic_message(panic.as_ref()),
                    "Parser task panicked, closing stream"
                );
            }
        });

        Self { rx, task }
    }

    /// Returns the next parse result, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}

impl Drop for ParseStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reads input and feeds the parser until a transport error or the consumer goes away.
async fn parse_loop<R>(reader: R, mode: ParseMode, tx: mpsc::Sender<Payload>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut parser = Parser::new(mode);

    loop {
        let read = match parser.pending_bulk_len() {
            Some(len) => read_raw(&mut reader, len)
                .await
                .map(|raw| parser.feed_raw(raw)),
            None => read_line(&mut reader, parser.is_mid_message())
                .await
                .map(|line| parser.feed_line(&line)),
        };

        let payload = match read {
            Ok(Ok(Some(reply))) => Ok(reply),
            Ok(Ok(None)) => continue,
            Ok(Err(parse_err)) => {
                trace!(error = %parse_err, "Protocol error");
                Err(StreamError::Protocol(parse_err))
            }
            Err(StreamError::Protocol(parse_err)) => {
                parser.reset();
                trace!(error = %parse_err, "Oversized line discarded");
                Err(StreamError::Protocol(parse_err))
            }
            Err(transport) => {
                let _ = tx.send(Err(transport)).await;
                return;
            }
        };

        if tx.send(payload).await.is_err() {
            // Consumer dropped the stream
            return;
        }
    }
}

/// Reads up to and including the next `\n`.
async fn read_line<R>(reader: &mut BufReader<R>, mid_message: bool) -> Result<Vec<u8>, StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if n == 0 {
        return Err(if mid_message {
            StreamError::UnexpectedEof
        } else {
            StreamError::Eof
        });
    }

    if line.last() != Some(&b'\n') {
        if n < MAX_LINE_LEN {
            return Err(StreamError::UnexpectedEof);
        }
        // The rest of an over-long line must not be read as a new command
        let size = n + discard_line(reader).await?;
        return Err(StreamError::Protocol(ParseError::MessageTooLarge {
            size,
            max: MAX_LINE_LEN,
        }));
    }

    Ok(line)
}

/// Skips input up to and including the next `\n`. Returns the bytes skipped.
async fn discard_line<R>(reader: &mut BufReader<R>) -> Result<usize, StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut discarded = 0usize;
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Err(StreamError::UnexpectedEof);
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(discarded + end + 1);
            }
            None => {
                let len = buf.len();
                reader.consume(len);
                discarded += len;
            }
        }
    }
}

/// Reads exactly `len + 2` bytes of a bulk payload.
async fn read_raw<R>(reader: &mut BufReader<R>, len: usize) -> Result<Bytes, StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = vec![0u8; len + 2];
    match reader.read_exact(&mut raw).await {
        Ok(_) => Ok(Bytes::from(raw)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(StreamError::UnexpectedEof),
        Err(e) => Err(StreamError::Io(e)),
    }
}
