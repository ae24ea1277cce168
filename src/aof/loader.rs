//! AOF replay.
//!
//! The file is a plain concatenation of multi bulk commands, so replaying it is
//! the same as serving a client that sends every command in order. Replay runs
//! on a detached connection, which starts at database 0; the `SELECT` entries
//! in the file move it between databases.

use super::AofError;
use crate::connection::Connection;
use crate::database::Database;
use crate::protocol::{ParseStream, Reply, StreamError};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tracing::{debug, error, info, warn};

/// Outcome of replaying an AOF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Replayed {
    /// Commands executed
    pub commands: usize,
    /// Database selected when the file ended; appends resume from here
    pub db_index: usize,
}

/// Replays the AOF at `path` into `db`.
///
/// A missing file replays nothing.
pub async fn load_aof(db: &dyn Database, path: &Path) -> Result<Replayed, AofError> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No AOF to replay");
            return Ok(Replayed::default());
        }
        Err(source) => {
            return Err(AofError::Open {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let conn = Connection::detached();
    let mut stream = ParseStream::new(file);
    let mut replayed = 0usize;

    while let Some(payload) = stream.next().await {
        let cmd_line = match payload {
            Ok(Reply::MultiBulk(args)) => args.into_iter().map(Option::unwrap_or_default).collect(),
            Ok(other) => {
                error!(payload = %other, "AOF entry is not a multi bulk command, skipping");
                continue;
            }
            Err(StreamError::Eof) => break,
            Err(StreamError::Protocol(e)) => {
                error!(error = %e, "Malformed AOF entry, skipping");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "AOF ends abruptly, stopping replay");
                break;
            }
        };

        let reply = db.exec(&conn, cmd_line).await;
        if let Some(message) = reply.error_message() {
            error!(error = message, "AOF command failed during replay");
        }
        replayed += 1;
    }

    info!(
        path = %path.display(),
        commands = replayed,
        db = conn.db_index(),
        "AOF replay complete"
    );
    Ok(Replayed {
        commands: replayed,
        db_index: conn.db_index(),
    })
}
