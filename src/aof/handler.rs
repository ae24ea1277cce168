//! Background AOF writer.
//!
//! ```text
//!   Db::exec ──add()──┐
//!   Db::exec ──add()──┼──> mpsc (65536) ──> writer task ──> BufWriter<File>
//!   Db::exec ──add()──┘                        │
//!                                              └─ SELECT <n> when the db changes
//! ```
//!
//! Producers only wait when the queue is full. The writer drains whatever is
//! queued, then flushes, so a burst of commands costs one flush.

use super::AofError;
use crate::protocol::{CmdLine, Reply};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the queue between command execution and the writer task.
pub const AOF_QUEUE_SIZE: usize = 1 << 16;

/// One command to append, tagged with the database it ran against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AofPayload {
    pub db_index: usize,
    pub cmd_line: CmdLine,
}

/// Producer side of the AOF queue. Cheap to clone; one per [`Db`](crate::database::Db).
#[derive(Debug, Clone)]
pub struct AofHandle {
    tx: mpsc::Sender<AofPayload>,
}

impl AofHandle {
    /// Queues a command for appending.
    pub async fn add(&self, db_index: usize, cmd_line: CmdLine) {
        let payload = AofPayload { db_index, cmd_line };
        if self.tx.send(payload).await.is_err() {
            warn!(db = db_index, "AOF writer has stopped, dropping command");
        }
    }
}

/// Owns the AOF file and the task that writes to it.
#[derive(Debug)]
pub struct AofHandler {
    path: PathBuf,
    handle: AofHandle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AofHandler {
    /// Opens `path` for appending (creating it if needed) and starts the writer task.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AofError> {
        Self::open_at(path, 0).await
    }

    /// Like [`AofHandler::open`] for a file whose last entry left `db_index`
    /// selected, so the next write to another database gets its `SELECT`.
    pub async fn open_at(path: impl AsRef<Path>, db_index: usize) -> Result<Self, AofError> {
        let path = path.as_ref().to_path_buf();

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options.open(&path).await.map_err(|source| AofError::Open {
            path: path.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(AOF_QUEUE_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(write_loop(AofWriter::new(file, db_index), rx, shutdown_rx));

        info!(path = %path.display(), "AOF writer started");

        Ok(Self {
            path,
            handle: AofHandle { tx },
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A new producer for this writer.
    pub fn handle(&self) -> AofHandle {
        self.handle.clone()
    }

    /// Stops the writer after everything already queued has been written and synced.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "AOF writer task failed");
            }
            info!(path = %self.path.display(), "AOF writer stopped");
        }
    }
}

/// File side of the writer task.
struct AofWriter {
    out: BufWriter<File>,
    current_db: usize,
}

impl AofWriter {
    fn new(file: File, current_db: usize) -> Self {
        Self {
            out: BufWriter::new(file),
            current_db,
        }
    }

    async fn append(&mut self, payload: AofPayload) {
        if payload.db_index != self.current_db {
            let select = Reply::multi_bulk([
                Bytes::from_static(b"select"),
                Bytes::from(payload.db_index.to_string()),
            ]);
            if let Err(e) = self.out.write_all(&select.serialize()).await {
                error!(error = %e, db = payload.db_index, "Failed to append SELECT, dropping command");
                return;
            }
            self.current_db = payload.db_index;
        }

        let bytes = Reply::multi_bulk(payload.cmd_line).serialize();
        if let Err(e) = self.out.write_all(&bytes).await {
            error!(error = %e, "Failed to append command");
        }
    }

    async fn flush(&mut self) {
        if let Err(e) = self.out.flush().await {
            error!(error = %e, "Failed to flush AOF");
        }
    }

    async fn sync(&mut self) {
        self.flush().await;
        if let Err(e) = self.out.get_ref().sync_all().await {
            error!(error = %e, "Failed to sync AOF");
        }
    }
}

async fn write_loop(
    mut writer: AofWriter,
    mut rx: mpsc::Receiver<AofPayload>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            payload = rx.recv() => {
                let Some(payload) = payload else { break };
                writer.append(payload).await;
                while let Ok(payload) = rx.try_recv() {
                    writer.append(payload).await;
                }
                writer.flush().await;
            }
            _ = &mut shutdown => break,
        }
    }

    // Stop accepting, then write what is already queued
    rx.close();
    let mut drained = 0usize;
    while let Some(payload) = rx.recv().await {
        writer.append(payload).await;
        drained += 1;
    }
    if drained > 0 {
        debug!(count = drained, "Drained queued AOF commands on shutdown");
    }
    writer.sync().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd_line;

    #[tokio::test]
    async fn test_writes_commands_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");

        let handler = AofHandler::open(&path).await.unwrap();
        let handle = handler.handle();
        handle.add(0, cmd_line(["set", "a", "1"])).await;
        handle.add(0, cmd_line(["del", "a"])).await;
        handler.close().await;

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(
            contents,
            b"*3\r\n$3\r\nset\r\n$1\r\na\r\n$1\r\n1\r\n*2\r\n$3\r\ndel\r\n$1\r\na\r\n"
        );
    }

    #[tokio::test]
    async fn test_writes_select_on_db_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");

        let handler = AofHandler::open(&path).await.unwrap();
        let handle = handler.handle();
        handle.add(0, cmd_line(["set", "a", "1"])).await;
        handle.add(1, cmd_line(["set", "a", "9"])).await;
        handle.add(1, cmd_line(["set", "b", "2"])).await;
        handle.add(0, cmd_line(["set", "c", "3"])).await;
        handler.close().await;

        let mut expected = Vec::new();
        for line in [
            cmd_line(["set", "a", "1"]),
            cmd_line(["select", "1"]),
            cmd_line(["set", "a", "9"]),
            cmd_line(["set", "b", "2"]),
            cmd_line(["select", "0"]),
            cmd_line(["set", "c", "3"]),
        ] {
            expected.extend(Reply::multi_bulk(line).serialize());
        }
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        std::fs::write(&path, b"*1\r\n$4\r\nping\r\n").unwrap();

        let handler = AofHandler::open(&path).await.unwrap();
        handler.handle().add(0, cmd_line(["flushdb"])).await;
        handler.close().await;

        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"*1\r\n$4\r\nping\r\n*1\r\n$7\r\nflushdb\r\n"
        );
    }

    #[tokio::test]
    async fn test_reopen_resumes_from_selected_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");

        let handler = AofHandler::open_at(&path, 1).await.unwrap();
        let handle = handler.handle();
        handle.add(0, cmd_line(["set", "z", "0"])).await;
        handle.add(1, cmd_line(["set", "y", "1"])).await;
        handler.close().await;

        let mut expected = Vec::new();
        for line in [
            cmd_line(["select", "0"]),
            cmd_line(["set", "z", "0"]),
            cmd_line(["select", "1"]),
            cmd_line(["set", "y", "1"]),
        ] {
            expected.extend(Reply::multi_bulk(line).serialize());
        }
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let handler = AofHandler::open(dir.path().join("a.aof")).await.unwrap();
        handler.close().await;
        handler.close().await;

        // Producers outliving the writer are tolerated
        handler.handle().add(0, cmd_line(["set", "x", "1"])).await;
    }

    #[tokio::test]
    async fn test_open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = AofHandler::open(dir.path().join("missing").join("a.aof"))
            .await
            .unwrap_err();
        assert!(matches!(err, AofError::Open { .. }));
    }
}
