//! Per-peer connection pool.
//!
//! At most `max_active` clients per peer are checked out at once; further
//! borrowers wait on a semaphore. A borrowed client goes back to the idle list
//! when its guard drops, unless a request on it failed or was interrupted, in
//! which case the connection is destroyed.

use super::client::{PeerClient, PeerError};
use crate::protocol::{CmdLine, Reply};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// Pool of connections to one peer.
#[derive(Debug)]
pub struct PeerPool {
    addr: String,
    idle: Mutex<Vec<PeerClient>>,
    permits: Semaphore,
    connect_timeout: Duration,
}

impl PeerPool {
    pub fn new(addr: impl Into<String>, max_active: usize, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            idle: Mutex::new(Vec::new()),
            permits: Semaphore::new(max_active.max(1)),
            connect_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Borrows a client, reusing an idle one or connecting a new one.
    pub async fn get(&self) -> Result<PooledClient<'_>, PeerError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PeerError::PoolClosed)?;

        let idle = self.lock_idle().pop();
        let client = match idle {
            Some(client) => client,
            None => PeerClient::connect(&self.addr, self.connect_timeout).await?,
        };

        Ok(PooledClient {
            pool: self,
            client: Some(client),
            in_flight: false,
            _permit: permit,
        })
    }

    /// Number of connections waiting to be reused.
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Drops idle connections and fails every later borrow.
    pub fn close(&self) {
        self.permits.close();
        self.lock_idle().clear();
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<PeerClient>> {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A client checked out of a [`PeerPool`].
#[derive(Debug)]
pub struct PooledClient<'a> {
    pool: &'a PeerPool,
    client: Option<PeerClient>,
    /// Set while a request is outstanding
    in_flight: bool,
    _permit: SemaphorePermit<'a>,
}

impl PooledClient<'_> {
    /// Sends one command on the borrowed connection.
    pub async fn send(&mut self, cmd_line: &CmdLine) -> Result<Reply, PeerError> {
        let client = self.client.as_mut().ok_or(PeerError::Closed)?;
        self.in_flight = true;
        let reply = client.send(cmd_line).await?;
        self.in_flight = false;
        Ok(reply)
    }
}

impl Drop for PooledClient<'_> {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        if self.in_flight || self.pool.permits.is_closed() {
            debug!(peer = %self.pool.addr, "Destroying peer connection");
            return;
        }
        self.pool.lock_idle().push(client);
    }
}
