//! Connection Handler Module
//!
//! [`RespHandler`] owns every live client connection. Each accepted socket is
//! served by one task that pulls commands from a [`ParseStream`], executes
//! them against the [`Database`], and writes the replies back.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. Registered in the live-connection map
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Next payload (parser)   │ │<── or the connection is closed
//!    │  └───────────┬─────────────┘ │    by server shutdown
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Database::exec          │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Write reply             │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. EOF / transport error / failed write
//!        │
//!        ▼
//! 5. Drain-close, deregister, task ends
//! ```
//!
//! Protocol errors are answered with an error reply and the loop continues.

use crate::connection::conn::Connection;
use crate::database::Database;
use crate::protocol::{ParseStream, Reply, StreamError};
use dashmap::DashMap;
use futures::future::join_all;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Counts bytes read from a client into [`ConnectionStats`].
struct CountingReader<R> {
    inner: R,
    stats: Arc<ConnectionStats>,
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            self.stats.bytes_read(buf.filled().len() - before);
        }
        poll
    }
}

/// Serves client connections against a shared [`Database`].
pub struct RespHandler {
    db: Arc<dyn Database>,
    /// Live connections by id
    active: DashMap<u64, Arc<Connection>>,
    closing: AtomicBool,
    next_id: AtomicU64,
    stats: Arc<ConnectionStats>,
}

impl std::fmt::Debug for RespHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespHandler")
            .field("active", &self.active.len())
            .field("closing", &self.is_closing())
            .finish()
    }
}

impl RespHandler {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            active: DashMap::new(),
            closing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Number of registered live connections.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Serves one client until it disconnects or the handler is closed.
    ///
    /// # Arguments
    ///
    /// * `stream` - The client socket (or any duplex byte stream)
    /// * `addr` - The client's address, for logging
    pub async fn handle<S>(&self, stream: S, addr: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if self.is_closing() {
            debug!(client = ?addr, "Rejecting connection during shutdown");
            return;
        }

        let (reader, writer) = tokio::io::split(stream);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Connection::new(id, addr, writer));

        self.active.insert(id, Arc::clone(&conn));
        self.stats.connection_opened();
        // close() may have taken its snapshot before the insert
        if self.is_closing() {
            debug!(conn = id, client = ?addr, "Handler closed while registering");
            self.close_client(&conn).await;
            return;
        }
        info!(conn = id, client = ?addr, "Client connected");

        let mut payloads = ParseStream::new(CountingReader {
            inner: reader,
            stats: Arc::clone(&self.stats),
        });

        loop {
            let payload = tokio::select! {
                payload = payloads.next() => payload,
                _ = conn.closed() => break,
            };
            let Some(payload) = payload else { break };

            match payload {
                Ok(Reply::MultiBulk(args)) => {
                    let cmd_line = args.into_iter().map(Option::unwrap_or_default).collect();
                    let reply = self.db.exec(&conn, cmd_line).await;
                    self.stats.command_processed();
                    if !self.send(&conn, &reply).await {
                        break;
                    }
                }
                Ok(other) => {
                    trace!(conn = id, payload = ?other, "Ignoring non-command payload");
                }
                Err(StreamError::Eof) => {
                    debug!(conn = id, "Client disconnected");
                    break;
                }
                Err(e) if e.is_transport() => {
                    match &e {
                        StreamError::Io(io_err)
                            if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                        {
                            debug!(conn = id, "Connection reset by client")
                        }
                        _ => warn!(conn = id, error = %e, "Connection error"),
                    }
                    break;
                }
                Err(e) => {
                    debug!(conn = id, error = %e, "Protocol error");
                    if !self.send(&conn, &Reply::error(e.to_string())).await {
                        break;
                    }
                }
            }
        }

        drop(payloads);
        self.close_client(&conn).await;
    }

    /// Writes a reply. Returns false if the connection is no longer usable.
    async fn send(&self, conn: &Connection, reply: &Reply) -> bool {
        let bytes = reply.serialize();
        match conn.write(&bytes).await {
            Ok(()) => {
                self.stats.bytes_written(bytes.len());
                true
            }
            Err(e) => {
                debug!(conn = conn.id(), error = %e, "Failed to write reply");
                false
            }
        }
    }

    async fn close_client(&self, conn: &Connection) {
        conn.close().await;
        self.db.after_client_close(conn);
        if self.active.remove(&conn.id()).is_some() {
            self.stats.connection_closed();
            info!(conn = conn.id(), "Client connection closed");
        }
    }

    /// Stops accepting clients, closes every live connection, then the database.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(active = self.active.len(), "Closing client connections");

        let live: Vec<Arc<Connection>> = self
            .active
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        join_all(live.iter().map(|conn| conn.close())).await;

        self.db.close().await;

        info!(
            accepted = self.stats.connections_accepted.load(Ordering::Relaxed),
            commands = self.stats.commands_processed.load(Ordering::Relaxed),
            bytes_read = self.stats.bytes_read.load(Ordering::Relaxed),
            bytes_written = self.stats.bytes_written.load(Ordering::Relaxed),
            "Handler closed"
        );
    }
}
