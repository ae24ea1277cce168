//! Peer client: one TCP connection to another cluster node.

use crate::protocol::{CmdLine, ParseError, ParseStream, Reply, StreamError};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing::debug;

/// Errors talking to a peer node.
#[derive(Debug, Error)]
pub enum PeerError {
    /// TCP connect failed
    #[error("cannot connect to peer {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TCP connect did not finish in time
    #[error("timed out connecting to peer {addr}")]
    ConnectTimeout { addr: String },

    /// I/O error on an established connection
    #[error("peer I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent something that is not a valid reply
    #[error("peer protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The peer closed the connection
    #[error("peer closed the connection")]
    Closed,

    /// The pool for this peer is shut down
    #[error("peer pool closed")]
    PoolClosed,
}

impl From<StreamError> for PeerError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Protocol(e) => PeerError::Protocol(e),
            StreamError::Io(e) => PeerError::Io(e),
            StreamError::Eof | StreamError::UnexpectedEof => PeerError::Closed,
        }
    }
}

/// A request/response connection to a peer.
///
/// Requests are strictly sequential: [`PeerClient::send`] writes one command
/// and waits for its reply.
#[derive(Debug)]
pub struct PeerClient {
    addr: String,
    writer: OwnedWriteHalf,
    replies: ParseStream,
}

impl PeerClient {
    /// Connects to `addr`, giving up after `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, PeerError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(PeerError::Connect {
                    addr: addr.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(PeerError::ConnectTimeout {
                    addr: addr.to_string(),
                })
            }
        };
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        debug!(peer = addr, "Connected to peer");

        Ok(Self {
            addr: addr.to_string(),
            writer,
            replies: ParseStream::replies(reader),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends one command and returns the peer's reply.
    ///
    /// An error reply from the peer is `Ok`; `Err` means the connection itself
    /// is no longer usable.
    pub async fn send(&mut self, cmd_line: &CmdLine) -> Result<Reply, PeerError> {
        let request = Reply::multi_bulk(cmd_line.iter().cloned()).serialize();
        self.writer.write_all(&request).await?;

        match self.replies.next().await {
            Some(payload) => Ok(payload?),
            None => Err(PeerError::Closed),
        }
    }
}
