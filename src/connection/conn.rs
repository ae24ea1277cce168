//! Client Connection
//!
//! A [`Connection`] wraps the write side of one client socket together with the
//! per-client state commands need (the selected database).
//!
//! ## Write Serialization
//!
//! Writes go through an async mutex, so two tasks writing to the same client
//! can never interleave bytes on the wire. Every write is also counted in a
//! [`Wait`] so that [`Connection::close`] can drain them first.
//!
//! ```text
//!  writer A ──┐
//!             ├──> Mutex<writer> ──> socket
//!  writer B ──┘
//!
//!  close(): wait for in-flight writes (max 10s) ──> shutdown ──> notify reader
//! ```

use crate::connection::wait::Wait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// How long `close` waits for in-flight writes before forcing the connection shut.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors that can occur while writing to a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The connection was already closed
    #[error("connection closed")]
    Closed,
}

/// One client connection as seen by the command layer.
pub struct Connection {
    id: u64,
    addr: Option<SocketAddr>,
    /// `None` for detached connections, e.g. during AOF replay
    writer: Option<Mutex<BoxedWriter>>,
    waiting_reply: Wait,
    selected_db: AtomicUsize,
    closed: watch::Sender<bool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("selected_db", &self.db_index())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Wraps the write half of a client socket.
    pub fn new<W>(id: u64, addr: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(id, addr, Some(Mutex::new(Box::new(writer))))
    }

    /// A connection with no socket behind it. Writes succeed and go nowhere.
    ///
    /// Used to replay the append-only file, which always starts at database 0.
    pub fn detached() -> Self {
        Self::build(0, None, None)
    }

    fn build(id: u64, addr: Option<SocketAddr>, writer: Option<Mutex<BoxedWriter>>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            addr,
            writer,
            waiting_reply: Wait::new(),
            selected_db: AtomicUsize::new(0),
            closed,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// The database index selected with `SELECT`.
    pub fn db_index(&self) -> usize {
        self.selected_db.load(Ordering::Relaxed)
    }

    pub fn select_db(&self, index: usize) {
        self.selected_db.store(index, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Number of writes currently in progress.
    pub fn in_flight_writes(&self) -> usize {
        self.waiting_reply.count()
    }

    /// Writes `bytes` to the client. A zero-length write is a no-op.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let Some(writer) = &self.writer else {
            return Ok(());
        };

        let _in_flight = self.waiting_reply.add();
        let mut writer = writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Closes the connection after in-flight writes finish, waiting at most
    /// [`CLOSE_TIMEOUT`].
    pub async fn close(&self) {
        self.close_with_timeout(CLOSE_TIMEOUT).await;
    }

    pub async fn close_with_timeout(&self, timeout: Duration) {
        if self.is_closed() {
            return;
        }

        if !self.waiting_reply.wait_timeout(timeout).await {
            warn!(
                conn = self.id,
                in_flight = self.in_flight_writes(),
                "Timed out draining writes, forcing close"
            );
        }

        if let Some(writer) = &self.writer {
            // A write still stuck past the timeout holds the lock; skip the shutdown then
            if let Ok(mut writer) = writer.try_lock() {
                if let Err(e) = writer.shutdown().await {
                    debug!(conn = self.id, error = %e, "Error shutting down writer");
                }
            }
        }

        self.closed.send_replace(true);
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this only errors if `self` is gone
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
